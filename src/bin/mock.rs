//! Toy problem program that does just enough to test the orchestrator
//!
//! Only used by tests, but cannot be made a dev-dependency as cargo can't
//! be told that "mock" is part of the test code. Behavior switches on the
//! executable's file name, so tests copy it under one name per role:
//!
//! - a name containing "dummy" sleeps until killed, like real busy-work;
//! - any other name prints its argument vector as one line and exits.
//!
//! Recognized argument patterns (all other arguments are just echoed):
//! - `exit:<code>` makes the timing role exit with that code;
//! - `--pid-dir <dir>` makes the dummy role record its pid as an empty
//!   file named after it in that directory, so tests can watch it die;
//! - `--echo-env <name>` appends `<name>=<value>` to the printed line.

use std::time::Duration;

fn main() {
    let exe = std::env::args().next().unwrap_or_default();
    let args = std::env::args().skip(1).collect::<Vec<_>>();

    if exe.contains("dummy") {
        if let Some(dir) = arg_value(&args, "--pid-dir") {
            let pid_file = std::path::Path::new(dir).join(std::process::id().to_string());
            std::fs::write(pid_file, "").expect("Failed to record dummy pid");
        }
        loop {
            std::thread::sleep(Duration::from_secs(1));
        }
    }

    let mut line = format!("timed {}", args.join(" "));
    if let Some(name) = arg_value(&args, "--echo-env") {
        let value = std::env::var(name).unwrap_or_default();
        line.push_str(&format!(" {name}={value}"));
    }
    println!("{line}");

    let code = args
        .iter()
        .find_map(|arg| arg.strip_prefix("exit:"))
        .map(|code| code.parse().expect("Expected integer exit code"))
        .unwrap_or(0);
    std::process::exit(code);
}

/// Value following a flag token, if present
fn arg_value<'args>(args: &'args [String], flag: &str) -> Option<&'args str> {
    let mut iter = args.iter();
    iter.find(|arg| *arg == flag)?;
    iter.next().map(String::as_str)
}
