//! Serial line endpoint.
//!
//! The device is opened non-blocking, switched to raw mode through termios,
//! and driven through tokio's [`AsyncFd`].

use crate::config::{Parity, SerialFraming};
use crate::endpoint::{Endpoint, Readiness};
use crate::{Error, Result};
use log::{debug, info};
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};
use tokio::io::unix::AsyncFd;
use tokio::io::Interest;

/// termios speed constant for a line speed.
fn speed_constant(baud: u32) -> Option<libc::speed_t> {
    let speed = match baud {
        #[cfg(any(target_os = "linux", target_os = "android"))]
        1_000_000 => libc::B1000000,
        #[cfg(any(target_os = "linux", target_os = "android"))]
        921_600 => libc::B921600,
        #[cfg(any(target_os = "linux", target_os = "android"))]
        576_000 => libc::B576000,
        #[cfg(any(target_os = "linux", target_os = "android"))]
        500_000 => libc::B500000,
        #[cfg(any(target_os = "linux", target_os = "android"))]
        460_800 => libc::B460800,
        230_400 => libc::B230400,
        115_200 => libc::B115200,
        57_600 => libc::B57600,
        38_400 => libc::B38400,
        19_200 => libc::B19200,
        9_600 => libc::B9600,
        4_800 => libc::B4800,
        2_400 => libc::B2400,
        _ => return None,
    };
    Some(speed)
}

fn os_error(what: &str) -> Error {
    Error::Serial(format!("{}: {}", what, io::Error::last_os_error()))
}

/// Puts the tty behind `fd` in raw mode with the requested speed and framing,
/// then drops any pending input.
fn configure(fd: RawFd, baud: u32, framing: SerialFraming) -> Result<()> {
    let speed = speed_constant(baud)
        .ok_or_else(|| Error::Serial(format!("invalid serial speed '{}'", baud)))?;

    // SAFETY: termios is plain data and tcgetattr fills it entirely
    let mut tio: libc::termios = unsafe { std::mem::zeroed() };
    if unsafe { libc::tcgetattr(fd, &mut tio) } == -1 {
        return Err(os_error("tcgetattr"));
    }

    // ignore modem controls, no hardware flow control
    tio.c_cflag = libc::CLOCAL | libc::CREAD;

    tio.c_iflag &= !(libc::IGNBRK
        | libc::BRKINT
        | libc::PARMRK
        | libc::ISTRIP
        | libc::INLCR
        | libc::IGNCR
        | libc::ICRNL
        | libc::IXON);
    tio.c_lflag &= !(libc::ECHO | libc::ECHONL | libc::ICANON | libc::ISIG | libc::IEXTEN);
    tio.c_oflag &= !(libc::OPOST | libc::ONLCR);

    // return whatever is available without waiting
    tio.c_cc[libc::VMIN] = 0;
    tio.c_cc[libc::VTIME] = 0;

    if unsafe { libc::cfsetispeed(&mut tio, speed) } == -1 {
        return Err(os_error("cfsetispeed"));
    }
    if unsafe { libc::cfsetospeed(&mut tio, speed) } == -1 {
        return Err(os_error("cfsetospeed"));
    }

    tio.c_cflag |= match framing.data_bits {
        5 => libc::CS5,
        6 => libc::CS6,
        7 => libc::CS7,
        8 => libc::CS8,
        n => return Err(Error::Serial(format!("invalid serial data size {}", n))),
    };
    match framing.parity {
        Parity::None | Parity::Space => {}
        Parity::Even => tio.c_cflag |= libc::PARENB,
        Parity::Odd => tio.c_cflag |= libc::PARENB | libc::PARODD,
    }
    if framing.stop_bits == 2 {
        tio.c_cflag |= libc::CSTOPB;
    }

    if unsafe { libc::tcflush(fd, libc::TCIFLUSH) } == -1 {
        return Err(os_error("tcflush"));
    }
    if unsafe { libc::tcsetattr(fd, libc::TCSANOW, &tio) } == -1 {
        return Err(os_error("tcsetattr"));
    }
    Ok(())
}

/// Level-triggered readiness of `fd` right now.
fn poll_now(fd: RawFd, interest: Interest) -> io::Result<Readiness> {
    let mut events = 0;
    if interest.is_readable() {
        events |= libc::POLLIN;
    }
    if interest.is_writable() {
        events |= libc::POLLOUT;
    }
    let mut pfd = libc::pollfd {
        fd,
        events,
        revents: 0,
    };

    if unsafe { libc::poll(&mut pfd, 1, 0) } == -1 {
        let e = io::Error::last_os_error();
        if e.kind() == io::ErrorKind::Interrupted {
            return Ok(Readiness::NONE);
        }
        return Err(e);
    }

    let failed = pfd.revents & (libc::POLLERR | libc::POLLHUP) != 0;
    Ok(Readiness {
        readable: interest.is_readable() && (pfd.revents & libc::POLLIN != 0 || failed),
        writable: interest.is_writable() && (pfd.revents & libc::POLLOUT != 0 || failed),
    })
}

/// A tty configured for raw, non-blocking transfers.
pub struct SerialPort {
    fd: AsyncFd<File>,
    path: PathBuf,
}

impl SerialPort {
    /// Opens and configures `path`. Must be called from within a tokio runtime.
    pub fn open(path: &Path, baud: u32, framing: SerialFraming) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NOCTTY | libc::O_NONBLOCK | libc::O_SYNC)
            .open(path)
            .map_err(|e| Error::Serial(format!("{}: {}", path.display(), e)))?;
        debug!(
            "serial device '{}' opened, fd={} - trying {}/{}",
            path.display(),
            file.as_raw_fd(),
            framing,
            baud
        );

        configure(file.as_raw_fd(), baud, framing)?;
        info!("serial device '{}' ready at {} {}", path.display(), baud, framing);

        Ok(Self {
            fd: AsyncFd::with_interest(file, Interest::READABLE | Interest::WRITABLE)?,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Endpoint for SerialPort {
    async fn ready(&mut self, interest: Interest) -> io::Result<Readiness> {
        loop {
            let mut guard = self.fd.ready(interest).await?;
            // The guard is taken before polling, so clearing a stale
            // notification cannot lose an event that arrives in between.
            let readiness = poll_now(self.fd.as_raw_fd(), interest)?;
            if !readiness.is_empty() {
                return Ok(readiness);
            }
            let stale = guard.ready();
            guard.clear_ready_matching(stale);
        }
    }

    fn try_read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.fd.get_ref().read(buf) {
            // a raw tty with VMIN=0 reads nothing when empty; hangups are EIO
            Ok(0) if !buf.is_empty() => Err(io::ErrorKind::WouldBlock.into()),
            other => other,
        }
    }

    fn try_write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.fd.get_ref().write(buf)
    }

    async fn close(&mut self) -> io::Result<()> {
        Ok(())
    }
}
