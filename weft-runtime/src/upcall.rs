//! Upcall Dispatcher
//!
//! Services requested by generated code. A proc writes an upcall code and
//! up to eight argument words into its record, sets its state to CallingC,
//! and yields; the loop hands the proc here. Results travel back through
//! out-pointers passed in the argument slots.
//!
//! After dispatch the code word is zeroed, so generated code can signal
//! the next upcall by writing a nonzero code without reading the old one.
//!
//! Note the argument-slot wrinkle inherited from the generator: del_chan
//! and recv take their object in the second argument slot, everything
//! else uses the first.

use std::ffi::{c_char, CStr};

use crate::abi::Prog;
use crate::log;
use crate::memory;
use crate::port::{self, Chan, Port};
use crate::proc::{self, Proc, ProcState};
use crate::rendezvous;
use crate::runtime;

/// Upcall codes written by generated stubs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum UpcallCode {
    /// Emit a diagnostic line for a 32-bit value.
    LogUint32 = 0,
    /// Emit a diagnostic line for a C string.
    LogStr = 1,
    /// Create a proc for a program; does not enqueue it (see `Sched`).
    Spawn = 2,
    /// Exit the proc when the checked expression was false.
    CheckExpr = 3,
    /// Allocate heap memory.
    Malloc = 4,
    /// Free heap memory.
    Free = 5,
    /// Allocate a port owned by the caller.
    NewPort = 6,
    /// Free a port.
    DelPort = 7,
    /// Allocate a channel bound to a port.
    NewChan = 8,
    /// Free a channel.
    DelChan = 9,
    /// Block writing and attempt rendezvous with the port owner.
    Send = 10,
    /// Block reading and attempt rendezvous with a queued writer.
    Recv = 11,
    /// Enqueue a spawned proc into the runnable pool.
    Sched = 12,
}

impl UpcallCode {
    /// Decode a code word written by generated code.
    pub fn from_word(w: usize) -> Option<Self> {
        Some(match w {
            0 => UpcallCode::LogUint32,
            1 => UpcallCode::LogStr,
            2 => UpcallCode::Spawn,
            3 => UpcallCode::CheckExpr,
            4 => UpcallCode::Malloc,
            5 => UpcallCode::Free,
            6 => UpcallCode::NewPort,
            7 => UpcallCode::DelPort,
            8 => UpcallCode::NewChan,
            9 => UpcallCode::DelChan,
            10 => UpcallCode::Send,
            11 => UpcallCode::Recv,
            12 => UpcallCode::Sched,
            _ => return None,
        })
    }
}

/// Dispatch the upcall a proc yielded with.
///
/// # Safety
///
/// The proc must be suspended at an upcall boundary with well-typed
/// argument words for its code; anything else is a protocol violation and
/// asserts.
pub unsafe fn handle_upcall(proc: *mut Proc) {
    let args = (*proc).upcall_args;
    log::debug(format!(
        "proc 0x{:x} calling fn #{}",
        proc as usize,
        (*proc).upcall_code
    ));

    let code = UpcallCode::from_word((*proc).upcall_code)
        .unwrap_or_else(|| panic!("unknown upcall code {}", (*proc).upcall_code));
    match code {
        UpcallCode::LogUint32 => {
            log::info(format!("log_uint32(0x{:x})", args[0] as u32));
        }
        UpcallCode::LogStr => {
            let s = CStr::from_ptr(args[0] as *const c_char);
            log::info(format!("log_str(\"{}\")", s.to_string_lossy()));
        }
        UpcallCode::Spawn => {
            let child = proc::new_proc((*proc).rt, args[1] as *const Prog);
            (args[0] as *mut *mut Proc).write(child);
        }
        UpcallCode::CheckExpr => {
            if args[0] == 0 {
                log::info("*** CHECK FAILED ***");
                (*proc).state = ProcState::Exiting as usize;
            }
        }
        UpcallCode::Malloc => {
            let p = memory::heap_alloc(args[1]);
            log::debug(format!("malloc({}) = 0x{:x}", args[1], p as usize));
            (args[0] as *mut usize).write(p as usize);
        }
        UpcallCode::Free => {
            log::debug(format!("free(0x{:x})", args[0]));
            memory::heap_free(args[0] as *mut u8);
        }
        UpcallCode::NewPort => {
            (args[0] as *mut *mut Port).write(port::new_port(proc));
        }
        UpcallCode::DelPort => {
            port::del_port(args[0] as *mut Port);
        }
        UpcallCode::NewChan => {
            (args[0] as *mut *mut Chan).write(port::new_chan(proc, args[1] as *mut Port));
        }
        UpcallCode::DelChan => {
            port::del_chan(args[1] as *mut Chan);
        }
        UpcallCode::Send => {
            rendezvous::send(proc, args[0] as *mut Chan);
        }
        UpcallCode::Recv => {
            rendezvous::recv(proc, args[1] as *mut Port);
        }
        UpcallCode::Sched => {
            runtime::enqueue_proc(args[0] as *mut Proc);
        }
    }

    // Zeroed so the next upcall only has to write a nonzero code.
    (*proc).upcall_code = 0;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;
    use crate::runtime::{del_runtime, enqueue_proc, n_live_procs, new_runtime, Runtime};
    use crate::switch::mock;

    unsafe fn rt_with_proc() -> (*mut Runtime, *mut Proc) {
        let config = RuntimeConfig::builder().rng_seed(3).build().unwrap();
        let rt = new_runtime(&config);
        let p = proc::new_proc(rt, mock::leak_prog());
        enqueue_proc(p);
        (rt, p)
    }

    unsafe fn issue(p: *mut Proc, code: UpcallCode, args: &[usize]) {
        (*p).state = ProcState::CallingC as usize;
        (*p).upcall_code = code as usize;
        (*p).upcall_args = [0; proc::MAX_UPCALL_ARGS];
        (&mut (*p).upcall_args)[..args.len()].copy_from_slice(args);
        handle_upcall(p);
    }

    #[test]
    fn test_dispatch_zeroes_code() {
        unsafe {
            let (rt, p) = rt_with_proc();
            issue(p, UpcallCode::LogUint32, &[42]);
            assert_eq!((*p).upcall_code, 0);
            del_runtime(rt);
        }
    }

    #[test]
    fn test_log_str_emits_contents() {
        unsafe {
            let (rt, p) = rt_with_proc();
            let guard = log::test_support::CAPTURE_LOCK.lock();
            log::begin_capture();
            issue(p, UpcallCode::LogStr, &[b"hi\0".as_ptr() as usize]);
            let lines = log::take_capture();
            drop(guard);
            assert!(lines.iter().any(|l| l.contains("log_str(\"hi\")")));
            del_runtime(rt);
        }
    }

    #[test]
    fn test_check_expr_false_exits_proc() {
        unsafe {
            let (rt, p) = rt_with_proc();
            issue(p, UpcallCode::CheckExpr, &[0]);
            assert_eq!((*p).state, ProcState::Exiting as usize);
            del_runtime(rt);
        }
    }

    #[test]
    fn test_check_expr_true_is_noop() {
        unsafe {
            let (rt, p) = rt_with_proc();
            issue(p, UpcallCode::CheckExpr, &[1]);
            assert_eq!((*p).state, ProcState::CallingC as usize);
            del_runtime(rt);
        }
    }

    #[test]
    fn test_malloc_free_through_arg_slots() {
        unsafe {
            let (rt, p) = rt_with_proc();
            let mut out: usize = 0;
            issue(
                p,
                UpcallCode::Malloc,
                &[&mut out as *mut usize as usize, 128],
            );
            assert_ne!(out, 0);
            issue(p, UpcallCode::Free, &[out]);
            del_runtime(rt);
        }
    }

    #[test]
    fn test_spawn_does_not_enqueue_until_sched() {
        unsafe {
            let (rt, p) = rt_with_proc();
            let child_prog = mock::leak_prog();
            let mut child: *mut Proc = std::ptr::null_mut();
            issue(
                p,
                UpcallCode::Spawn,
                &[&mut child as *mut *mut Proc as usize, child_prog as usize],
            );
            assert!(!child.is_null());
            assert_eq!((*child).state, ProcState::Running as usize);
            assert_eq!(n_live_procs(rt), 1);

            issue(p, UpcallCode::Sched, &[child as usize]);
            assert_eq!(n_live_procs(rt), 2);
            assert_eq!((*child).idx, 1);
            del_runtime(rt);
        }
    }

    #[test]
    fn test_port_chan_lifecycle_via_upcalls() {
        unsafe {
            let (rt, p) = rt_with_proc();
            let mut port: *mut Port = std::ptr::null_mut();
            issue(p, UpcallCode::NewPort, &[&mut port as *mut _ as usize]);
            assert!(!port.is_null());
            assert_eq!((*port).owner, p);

            let mut chan: *mut Chan = std::ptr::null_mut();
            issue(
                p,
                UpcallCode::NewChan,
                &[&mut chan as *mut _ as usize, port as usize],
            );
            assert!(!chan.is_null());
            assert_eq!((*chan).port, port);

            // del_chan and recv read their object from the second slot.
            issue(p, UpcallCode::DelChan, &[0, chan as usize]);
            issue(p, UpcallCode::DelPort, &[port as usize]);
            del_runtime(rt);
        }
    }

    #[test]
    #[should_panic(expected = "unknown upcall code")]
    fn test_unknown_code_panics() {
        unsafe {
            let (_rt, p) = rt_with_proc();
            issue(p, UpcallCode::LogUint32, &[0]);
            (*p).upcall_code = 99;
            handle_upcall(p);
        }
    }
}
