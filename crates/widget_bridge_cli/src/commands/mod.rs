pub mod keys;
pub mod replay;
