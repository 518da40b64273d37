pub mod chunk;
pub mod conversation;
pub mod intent;
pub mod tool;
