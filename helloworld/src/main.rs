//! Probe target: calls `hello_world` once per interval so a uprobe has
//! something to fire on.

use std::{thread, time::Duration};

use clap::Parser;

#[derive(Debug, Parser)]
struct Opt {
    /// Delay between calls, in milliseconds
    #[clap(long, default_value_t = 1000)]
    interval_ms: u64,

    /// Stop after this many calls (runs until killed if unset)
    #[clap(long)]
    iterations: Option<u64>,
}

/// The probed function. Unmangled and never inlined so that its symbol
/// survives in the binary and every call actually executes its entry point.
#[unsafe(no_mangle)]
#[inline(never)]
pub extern "C" fn hello_world(i: u64) -> u64 {
    println!("hello_world {}", i);
    std::hint::black_box(i)
}

fn main() {
    let opt = Opt::parse();

    println!("helloworld running as pid {}", std::process::id());

    let interval = Duration::from_millis(opt.interval_ms);
    let mut i = 0u64;
    while opt.iterations.is_none_or(|n| i < n) {
        hello_world(i);
        i += 1;
        thread::sleep(interval);
    }
}
