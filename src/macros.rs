macro_rules! syscall {
  ($fn: ident ( $($arg: expr),* $(,)* ) ) => {{
      #[allow(unused_unsafe)]
      let res = unsafe { libc::$fn($($arg, )*) };
      if res == -1 {
          Err(std::io::Error::last_os_error())
      } else {
          Ok(res)
      }
  }};
}

/// Like [`syscall!`] but keeps the Unix convention the backends speak:
/// a non-negative value on success, the negated errno on failure.
macro_rules! syscall_raw {
  ($fn: ident ( $($arg: expr),* $(,)* ) ) => {{
      #[allow(unused_unsafe)]
      let res = unsafe { libc::$fn($($arg, )*) } as isize;
      if res == -1 {
          -(std::io::Error::last_os_error().raw_os_error().unwrap_or(libc::EIO) as isize)
      } else {
          res
      }
  }};
}
