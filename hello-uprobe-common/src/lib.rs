#![no_std]

/// Name of the entry program in the eBPF object.
pub const UPROBE_PROGRAM: &str = "uprobe";
/// Name of the return program in the eBPF object.
pub const URETPROBE_PROGRAM: &str = "uretprobe";

/// Unmangled symbol exported by the `helloworld` target.
pub const HELLO_WORLD_SYMBOL: &str = "hello_world";
