//! Thin epoll wrapper.
//!
//! The registration tag stored in `epoll_event.u64` is the descriptor
//! itself; the reactor resolves it through its registry, so no pointer
//! ever crosses the kernel boundary.

use microloop_core::{Interest, KernelError};

use std::os::unix::io::RawFd;

pub(crate) struct Poller {
    epfd: RawFd,
}

/// One ready descriptor reported by `wait()`.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Ready {
    pub fd: RawFd,
    pub events: Interest,
}

impl Poller {
    pub fn new() -> Result<Self, KernelError> {
        let epfd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if epfd < 0 {
            return Err(KernelError::last("epoll_create1"));
        }
        Ok(Self { epfd })
    }

    pub fn add(&self, fd: RawFd, interest: Interest) -> Result<(), KernelError> {
        let mut ev = libc::epoll_event {
            events: interest.bits(),
            u64: fd as u64,
        };
        let ret = unsafe { libc::epoll_ctl(self.epfd, libc::EPOLL_CTL_ADD, fd, &mut ev) };
        if ret < 0 {
            return Err(KernelError::last("epoll_ctl(ADD)"));
        }
        Ok(())
    }

    pub fn delete(&self, fd: RawFd) -> Result<(), KernelError> {
        let ret = unsafe {
            libc::epoll_ctl(self.epfd, libc::EPOLL_CTL_DEL, fd, std::ptr::null_mut())
        };
        if ret < 0 {
            return Err(KernelError::last("epoll_ctl(DEL)"));
        }
        Ok(())
    }

    /// Wait for up to `buf.capacity()` ready descriptors. `timeout_ms < 0`
    /// waits indefinitely. EINTR is reported as zero ready descriptors.
    pub fn wait(
        &self,
        buf: &mut Vec<libc::epoll_event>,
        out: &mut Vec<Ready>,
        timeout_ms: i32,
    ) -> Result<usize, KernelError> {
        out.clear();
        buf.clear();
        if buf.capacity() == 0 {
            buf.reserve(1);
        }
        let cap = buf.capacity().min(libc::c_int::MAX as usize);

        let n = unsafe {
            libc::epoll_wait(self.epfd, buf.as_mut_ptr(), cap as libc::c_int, timeout_ms)
        };
        if n < 0 {
            let err = KernelError::last("epoll_wait");
            if err.errno == libc::EINTR {
                return Ok(0);
            }
            return Err(err);
        }

        // Safety: the kernel initialized the first `n` entries.
        unsafe { buf.set_len(n as usize) };
        out.extend(buf.iter().map(|ev| Ready {
            fd: ev.u64 as RawFd,
            events: Interest::from_bits(ev.events),
        }));
        Ok(out.len())
    }

    #[cfg(test)]
    pub(crate) fn raw_fd(&self) -> RawFd {
        self.epfd
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        if self.epfd >= 0 {
            unsafe { libc::close(self.epfd) };
            self.epfd = -1;
        }
    }
}
