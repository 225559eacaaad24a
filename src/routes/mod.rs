pub mod auth;
pub mod flashcards;
pub mod notes;
pub mod quiz;
pub mod subjects;
