use crate::protocol::{DEFAULT_PORT, PROTOCOL_VERSION};

pub fn run() {
    println!("Version: {}", env!("CARGO_PKG_VERSION"));
    println!("Protocol: {}", PROTOCOL_VERSION);
    println!("Default port: {}", DEFAULT_PORT);
}
