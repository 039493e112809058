//! Busy-work executable that spins CPUs until terminated
//!
//! Launch-compatible with the orchestrator's dummy-job argv: any argument
//! other than `--threads <n>` is accepted and ignored, so problem
//! parameters and pass-through tokens can be forwarded to it harmlessly.
//! Give it via `--dummy-program "spin --threads <n>"` with n matching the
//! CPU count of each affinity group.

use std::hint::black_box;

fn main() {
    let mut threads = 1usize;
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--threads" {
            threads = args
                .next()
                .and_then(|value| value.parse().ok())
                .unwrap_or(1);
        }
    }
    for _ in 1..threads {
        std::thread::spawn(spin);
    }
    spin()
}

/// Tight arithmetic loop the optimizer cannot remove
fn spin() -> ! {
    let mut state = 0u64;
    loop {
        // Linear congruential step, data-dependent so it stays on the core
        state = black_box(state)
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        black_box(state);
    }
}
