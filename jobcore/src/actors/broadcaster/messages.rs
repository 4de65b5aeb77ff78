use crate::types::OutputSender;

#[derive(Debug)]
pub enum Message {
    Subscribe { subscriber: OutputSender },
}
