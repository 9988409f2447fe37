//! Ports and Channels
//!
//! Rendezvous endpoints. A port is a receive endpoint owned by exactly one
//! proc; a channel is a send endpoint bound to one port. A port keeps a
//! queue of channels whose senders are blocked on it; every queued channel
//! records its queue position so swap-deletion can patch it.
//!
//! Ownership is explicit: ports and channels live from their creation
//! upcall to their deletion upcall. References back to procs are
//! non-owning. The single-latest-sender field on a channel is a known
//! limitation of the model, not a contract: a channel shared by several
//! procs only remembers the most recent sender.

use std::alloc::Layout;
use std::ffi::c_void;
use std::ptr::addr_of_mut;

use crate::log;
use crate::memory::{xalloc_zeroed, xfree};
use crate::proc::Proc;
use crate::ptr_vec::PtrVec;

/// A receive endpoint, owned by the proc that created it.
#[repr(C)]
pub struct Port {
    /// Live references held by channels bound to this port.
    pub live_refcnt: usize,
    /// Weak references.
    pub weak_refcnt: usize,
    /// Owning proc; the only proc allowed to recv on this port.
    pub owner: *mut Proc,
    /// Channels queued to send to this port.
    pub writers: PtrVec<Chan>,
}

/// A send endpoint bound to one port.
#[repr(C)]
pub struct Chan {
    /// Target port (non-owning).
    pub port: *mut Port,
    /// Proc that most recently sent through this channel.
    pub sender: *mut Proc,
    /// Nonzero while this channel sits in its port's writer queue.
    pub queued: usize,
    /// Position in the writer queue while queued.
    pub idx: usize,
    /// Overflow buffer reserved for buffered sends; empty in the current
    /// design.
    pub buf: PtrVec<c_void>,
}

/// Allocate a port owned by `owner`.
pub unsafe fn new_port(owner: *mut Proc) -> *mut Port {
    let port = xalloc_zeroed(Layout::new::<Port>()) as *mut Port;
    (*port).owner = owner;
    addr_of_mut!((*port).writers).write(PtrVec::new());
    log::logptr("new port", port as usize);
    port
}

/// Free a port.
///
/// # Safety
///
/// Asserts that no live references remain and that the writer queue has
/// been drained; deleting a port with queued writers is a protocol
/// violation by the owner.
pub unsafe fn del_port(port: *mut Port) {
    log::logptr("del port", port as usize);
    assert_eq!((*port).live_refcnt, 0, "port deleted with live references");
    (*port).writers.fini();
    xfree(port as *mut u8, Layout::new::<Port>());
}

/// Allocate a channel bound to `port`, created by `sender`.
pub unsafe fn new_chan(sender: *mut Proc, port: *mut Port) -> *mut Chan {
    assert!(!port.is_null());
    let chan = xalloc_zeroed(Layout::new::<Chan>()) as *mut Chan;
    log::logptr("new chan", chan as usize);
    (*chan).sender = sender;
    (*chan).port = port;
    addr_of_mut!((*chan).buf).write(PtrVec::new());
    chan
}

/// Free a channel.
///
/// # Safety
///
/// The channel must not be queued on its port.
pub unsafe fn del_chan(chan: *mut Chan) {
    log::logptr("del chan", chan as usize);
    assert!(!chan.is_null());
    debug_assert_eq!((*chan).queued, 0, "channel deleted while queued");
    (*chan).buf.fini();
    xfree(chan as *mut u8, Layout::new::<Chan>());
}

/// Remove `chan` from `port`'s writer queue, patching the queue position
/// of whichever channel the swap-delete moved into the hole.
pub unsafe fn writers_swapdel(port: *mut Port, chan: *mut Chan) {
    let writers = addr_of_mut!((*port).writers);
    assert_eq!((*writers).get((*chan).idx), chan);
    if let Some(moved) = (*writers).swapdel((*chan).idx) {
        (*moved).idx = (*chan).idx;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;
    use crate::proc::{del_proc, new_proc};
    use crate::runtime::{del_runtime, new_runtime};
    use crate::switch::mock;

    #[test]
    fn test_port_create_delete_roundtrip() {
        unsafe {
            let rt = new_runtime(&RuntimeConfig::default());
            let owner = new_proc(rt, mock::leak_prog());
            let port = new_port(owner);
            assert_eq!((*port).owner, owner);
            assert_eq!((*port).live_refcnt, 0);
            assert!((*port).writers.is_empty());
            del_port(port);
            del_proc(owner);
            del_runtime(rt);
        }
    }

    #[test]
    fn test_chan_binds_port_and_sender() {
        unsafe {
            let rt = new_runtime(&RuntimeConfig::default());
            let owner = new_proc(rt, mock::leak_prog());
            let port = new_port(owner);
            let chan = new_chan(owner, port);
            assert_eq!((*chan).port, port);
            assert_eq!((*chan).sender, owner);
            assert_eq!((*chan).queued, 0);
            assert!((*chan).buf.is_empty());
            del_chan(chan);
            del_port(port);
            del_proc(owner);
            del_runtime(rt);
        }
    }

    #[test]
    fn test_writers_swapdel_patches_moved_idx() {
        unsafe {
            let rt = new_runtime(&RuntimeConfig::default());
            let owner = new_proc(rt, mock::leak_prog());
            let port = new_port(owner);
            let a = new_chan(owner, port);
            let b = new_chan(owner, port);
            let c = new_chan(owner, port);
            for (i, ch) in [a, b, c].into_iter().enumerate() {
                (*ch).idx = i;
                (*ch).queued = 1;
                (*port).writers.push(ch);
            }

            writers_swapdel(port, a);
            (*a).queued = 0;
            // c moved into slot 0 and its recorded position followed.
            assert_eq!((*port).writers.get(0), c);
            assert_eq!((*c).idx, 0);
            assert_eq!((*b).idx, 1);

            writers_swapdel(port, b);
            (*b).queued = 0;
            writers_swapdel(port, c);
            (*c).queued = 0;
            assert!((*port).writers.is_empty());

            del_chan(a);
            del_chan(b);
            del_chan(c);
            del_port(port);
            del_proc(owner);
            del_runtime(rt);
        }
    }
}
