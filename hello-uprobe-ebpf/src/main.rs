#![no_std]
#![no_main]

// Program names must stay in sync with `hello_uprobe_common::{UPROBE_PROGRAM, URETPROBE_PROGRAM}`.

use aya_ebpf::{
    helpers::bpf_get_current_pid_tgid,
    macros::{uprobe, uretprobe},
    programs::{ProbeContext, RetProbeContext},
};
use aya_log_ebpf::info;

#[uprobe]
pub fn uprobe(ctx: ProbeContext) -> u32 {
    match try_uprobe(ctx) {
        Ok(()) => 0,
        Err(ret) => ret,
    }
}

fn try_uprobe(ctx: ProbeContext) -> Result<(), u32> {
    let pid = (bpf_get_current_pid_tgid() >> 32) as u32;
    let counter: u64 = ctx.arg(0).ok_or(1u32)?;

    info!(&ctx, "UPROBE ENTRY probe triggered, pid: {}, counter: {}", pid, counter);

    Ok(())
}

#[uretprobe]
pub fn uretprobe(ctx: RetProbeContext) -> u32 {
    match try_uretprobe(ctx) {
        Ok(()) => 0,
        Err(ret) => ret,
    }
}

fn try_uretprobe(ctx: RetProbeContext) -> Result<(), u32> {
    let pid = (bpf_get_current_pid_tgid() >> 32) as u32;
    let ret: u64 = ctx.ret().ok_or(1u32)?;

    info!(&ctx, "UPROBE EXIT: pid: {}, return = {}", pid, ret);

    Ok(())
}

#[cfg(not(test))]
#[panic_handler]
fn panic(_info: &core::panic::PanicInfo) -> ! {
    unsafe { core::hint::unreachable_unchecked() }
}
