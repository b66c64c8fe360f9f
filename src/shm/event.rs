//! Optional notification primitive raised by the producer after each frame
//!
//! On Linux this is a POSIX named semaphore. Elsewhere it is always reported
//! absent and the receiver falls back to polling the header.

use std::time::Duration;

use crate::error::Result;

#[cfg(target_os = "linux")]
mod platform {
    use std::ffi::CString;
    use std::io::ErrorKind;
    use std::time::Duration;

    use libc::{sem_t, timespec, EAGAIN, EINTR, ETIMEDOUT};

    use crate::error::{Error, Result};

    pub struct FrameEvent {
        sem: *mut sem_t,
        name: String,
    }

    // The semaphore handle is process-wide; sem_* calls are thread safe.
    unsafe impl Send for FrameEvent {}
    unsafe impl Sync for FrameEvent {}

    impl FrameEvent {
        pub fn open(name: &str) -> Result<Option<Self>> {
            let c_name = CString::new(format!("/{name}"))
                .map_err(|_| Error::ReadFailure(format!("invalid event name {name:?}")))?;
            let sem = unsafe { libc::sem_open(c_name.as_ptr(), 0) };
            if sem == libc::SEM_FAILED {
                let err = std::io::Error::last_os_error();
                if err.kind() == ErrorKind::NotFound {
                    return Ok(None);
                }
                return Err(Error::Io(err));
            }
            Ok(Some(Self {
                sem,
                name: name.to_string(),
            }))
        }

        pub fn name(&self) -> &str {
            &self.name
        }

        pub fn wait(&self, timeout: Option<Duration>) -> Result<bool> {
            let signalled = match timeout {
                None => self.wait_forever()?,
                Some(timeout) if timeout.is_zero() => self.try_take()?,
                Some(timeout) => self.wait_until(deadline_after(timeout))?,
            };
            if signalled {
                // Several posts between two waits collapse into one wake-up.
                while self.try_take()? {}
            }
            Ok(signalled)
        }

        fn wait_forever(&self) -> Result<bool> {
            loop {
                if unsafe { libc::sem_wait(self.sem) } == 0 {
                    return Ok(true);
                }
                let err = std::io::Error::last_os_error();
                if err.raw_os_error() != Some(EINTR) {
                    return Err(Error::Io(err));
                }
            }
        }

        fn wait_until(&self, deadline: timespec) -> Result<bool> {
            loop {
                if unsafe { libc::sem_timedwait(self.sem, &deadline) } == 0 {
                    return Ok(true);
                }
                let err = std::io::Error::last_os_error();
                match err.raw_os_error() {
                    Some(EINTR) => continue,
                    Some(ETIMEDOUT) => return Ok(false),
                    _ => return Err(Error::Io(err)),
                }
            }
        }

        fn try_take(&self) -> Result<bool> {
            if unsafe { libc::sem_trywait(self.sem) } == 0 {
                return Ok(true);
            }
            let err = std::io::Error::last_os_error();
            match err.raw_os_error() {
                Some(EAGAIN) | Some(EINTR) => Ok(false),
                _ => Err(Error::Io(err)),
            }
        }
    }

    impl Drop for FrameEvent {
        fn drop(&mut self) {
            unsafe {
                libc::sem_close(self.sem);
            }
        }
    }

    /// Absolute CLOCK_REALTIME deadline, as sem_timedwait expects.
    fn deadline_after(timeout: Duration) -> timespec {
        let mut now = timespec {
            tv_sec: 0,
            tv_nsec: 0,
        };
        unsafe {
            libc::clock_gettime(libc::CLOCK_REALTIME, &mut now);
        }
        let nanos = now.tv_nsec as i64 + timeout.subsec_nanos() as i64;
        let secs = (timeout.as_secs() as libc::time_t)
            .saturating_add(now.tv_sec)
            .saturating_add((nanos / 1_000_000_000) as libc::time_t);
        timespec {
            tv_sec: secs,
            tv_nsec: (nanos % 1_000_000_000) as libc::c_long,
        }
    }
}

#[cfg(not(target_os = "linux"))]
mod platform {
    use std::time::Duration;

    use crate::error::Result;

    pub struct FrameEvent {
        name: String,
    }

    impl FrameEvent {
        pub fn open(_name: &str) -> Result<Option<Self>> {
            Ok(None)
        }

        pub fn name(&self) -> &str {
            &self.name
        }

        pub fn wait(&self, timeout: Option<Duration>) -> Result<bool> {
            if let Some(timeout) = timeout {
                std::thread::sleep(timeout);
            }
            Ok(false)
        }
    }
}

/// Handle to the producer's named notification primitive.
pub struct FrameEvent(platform::FrameEvent);

impl FrameEvent {
    /// Open the named primitive; `Ok(None)` means it does not exist and the
    /// caller should poll instead.
    pub fn open(name: &str) -> Result<Option<Self>> {
        Ok(platform::FrameEvent::open(name)?.map(FrameEvent))
    }

    pub fn name(&self) -> &str {
        self.0.name()
    }

    /// Block until signalled or until `timeout` elapses. `None` waits
    /// indefinitely, a zero timeout never blocks.
    pub fn wait(&self, timeout: Option<Duration>) -> Result<bool> {
        self.0.wait(timeout)
    }
}
