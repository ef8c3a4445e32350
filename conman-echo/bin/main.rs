//! Drive the session engine over its loopback stack.
//!
//! Configure the interfaces first, then pick a mode. Call examples:
//!
//! * `conman-echo 192.168.1.10 echo -n 10000 -l 1460`
//! * `conman-echo 192.168.1.10 --softap 192.168.4.1 announce -c 3 hello`
use std::process;

use conman_echo::config::{self, Mode};

fn main() {
    env_logger::init();

    let config = config::Config::from_args();

    println!("[+] Configured loopback, communicating");

    let result = match &config.mode {
        Mode::Echo(echo) => conman_echo::echo(&config, echo),
        Mode::Announce(announce) => conman_echo::announce(&config, announce),
    };

    match result {
        Ok(score) => {
            println!("[+] Done\n");
            println!("{}", score);
        },
        Err(err) => {
            eprintln!("[-] Failed: {}", err);
            process::exit(1);
        },
    }
}
