//! Rendezvous Engine
//!
//! Synchronous single-word transfer between a blocked writer and a blocked
//! reader. The writer's value word travels in its second upcall argument;
//! the reader's first upcall argument is the address the word lands at.
//! Structured values are not handled; a structured send is a future
//! extension.
//!
//! Send and recv both transition the calling proc to its blocked state
//! first and then try to pair it with a counterpart, so a proc that fails
//! to pair is already parked where the other side's next attempt can find
//! it. A send on a port with no owner is logged and dropped; the sender
//! stays blocked (a future version should throw into the sender instead).

use crate::log;
use crate::port::{self, Chan, Port};
use crate::proc::{Proc, ProcState};
use crate::runtime::{proc_state_transition, rand_word};

/// Try to pair blocked writer `src` with blocked reader `dst`.
///
/// On success the value word moves, both procs return to Running, and the
/// engine reports true. When either side is not in the matching blocked
/// state nothing changes and the engine reports false.
pub unsafe fn attempt_rendezvous(src: *mut Proc, dst: *mut Proc) -> bool {
    assert!(!src.is_null());
    assert!(!dst.is_null());
    if (*src).state == ProcState::BlockedWriting as usize
        && (*dst).state == ProcState::BlockedReading as usize
    {
        let sval = (*src).upcall_args[1];
        let dptr = (*dst).upcall_args[0] as *mut usize;
        log::info(format!(
            "rendezvous successful, copying val 0x{:x} to dst 0x{:x}",
            sval, dptr as usize
        ));
        dptr.write(sval);
        proc_state_transition(src, ProcState::BlockedWriting, ProcState::Running);
        proc_state_transition(dst, ProcState::BlockedReading, ProcState::Running);
        return true;
    }
    log::info(format!(
        "rendezvous failed: src state {} vs. dst state {}",
        (*src).state,
        (*dst).state
    ));
    false
}

/// Service the send upcall: `src` sends the value in its second upcall
/// argument through `chan`.
///
/// The sender blocks first, then tries to rendezvous with the port's
/// owner. When the owner is not waiting the channel is queued on the
/// port's writer list (once). When the port has no owner the send is dead:
/// logged, dropped, sender left blocked.
pub unsafe fn send(src: *mut Proc, chan: *mut Chan) {
    log::logptr("send to chan", chan as usize);
    assert!(!chan.is_null());
    assert!(!(*chan).port.is_null());
    // A channel only remembers its latest sender; see the known limitation
    // noted in `port`.
    (*chan).sender = src;
    proc_state_transition(src, ProcState::CallingC, ProcState::BlockedWriting);
    let p = (*chan).port;
    if !(*p).owner.is_null() {
        if !(attempt_rendezvous(src, (*p).owner) || (*chan).queued != 0) {
            (*chan).idx = (*p).writers.len();
            (*p).writers.push(chan);
            (*chan).queued = 1;
        }
    } else {
        log::info("*** DEAD SEND *** (possibly throw?)");
    }
}

/// Service the recv upcall: `dst` receives into the address in its first
/// upcall argument from `port`.
///
/// Only the port's owner may recv on it. The receiver blocks first; if any
/// writers are queued, one is chosen uniformly at random and paired. A
/// successfully paired channel leaves the queue.
pub unsafe fn recv(dst: *mut Proc, port: *mut Port) {
    log::logptr("recv from port", port as usize);
    assert!(!port.is_null());
    assert!(!dst.is_null());
    assert_eq!((*port).owner, dst, "recv by a proc that does not own the port");
    proc_state_transition(dst, ProcState::CallingC, ProcState::BlockedReading);
    let n = (*port).writers.len();
    if n > 0 {
        let i = rand_word((*dst).rt) as usize % n;
        let chan = (*port).writers.get(i);
        debug_assert_eq!((*chan).idx, i);
        if attempt_rendezvous((*chan).sender, dst) {
            port::writers_swapdel(port, chan);
            let remaining = (*port).writers.len();
            (*port).writers.trim(remaining);
            (*chan).queued = 0;
        }
    }
}
