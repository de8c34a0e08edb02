#![cfg_attr(target_os = "none", no_std)]
#![cfg_attr(target_os = "none", no_main)]

#[cfg(target_os = "none")]
extern crate alloc;
#[cfg(target_os = "none")]
extern crate panic_halt;

mod diaglog;
mod instant;

#[cfg(target_os = "none")]
mod hw;
#[cfg(target_os = "none")]
mod link;
#[cfg(target_os = "none")]
mod runtime;

#[cfg(not(target_os = "none"))]
fn main() {}
