mod breaker;
mod common;
mod scoring;
