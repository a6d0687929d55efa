pub mod extractor;
pub mod hasher;
pub mod scanner;
