#[derive(Debug)]
pub enum WorkerMessage {
    Stop,
}
