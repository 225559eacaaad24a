#[tokio::main]
async fn main() {
    notesage::start_server().await;
}
