pub(crate) mod broadcaster;
pub mod manager;
pub(crate) mod worker;
