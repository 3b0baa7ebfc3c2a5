use std::{path::PathBuf, process::exit};

pub fn current_dir() -> PathBuf {
    std::env::current_dir().unwrap_or_else(|e| {
        log::error!("Failed to get current dir: {}", e);
        exit(1);
    })
}
