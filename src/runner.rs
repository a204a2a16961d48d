use std::io::{self, Read, Write};
use std::process::{Command, ExitStatus, Stdio};
use std::sync::Mutex;
use std::thread;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Mirrors a stream to the terminal and to the run's log.
///
/// The terminal is best effort: after its first failure it is dropped and
/// every later chunk still goes to the log. Only a log failure is returned.
pub struct Tee<T, L> {
    terminal: Option<T>,
    log: L,
    lost: Option<io::Error>,
}

impl<T: Write, L: Write> Tee<T, L> {
    pub fn new(terminal: T, log: L) -> Self {
        Tee {
            terminal: Some(terminal),
            log,
            lost: None,
        }
    }

    /// Why the terminal was dropped, if it was.
    pub fn terminal_error(&self) -> Option<&io::Error> {
        self.lost.as_ref()
    }

    fn mirror(&mut self, op: impl FnOnce(&mut T) -> io::Result<()>) {
        if let Some(terminal) = self.terminal.as_mut() {
            if let Err(e) = op(terminal) {
                self.terminal = None;
                self.lost = Some(e);
            }
        }
    }
}

impl<T: Write, L: Write> Write for Tee<T, L> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.mirror(|t| t.write_all(buf).and_then(|()| t.flush()));
        self.log.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.mirror(|t| t.flush());
        self.log.flush()
    }
}

/// One log file fed by both output pumps. Each chunk is written under the lock
/// so chunks from stdout and stderr never split each other.
struct SharedSink<'a, W>(&'a Mutex<W>);

impl<W: Write> SharedSink<'_, W> {
    fn lock(&self) -> io::Result<std::sync::MutexGuard<'_, W>> {
        self.0
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "log sink poisoned"))
    }
}

impl<W: Write> Write for SharedSink<'_, W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.lock()?.write(buf)
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.lock()?.write_all(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.lock()?.flush()
    }
}

/// Extract an exit code from a process status, mapping signals to 128+N on Unix.
fn exit_code_from_status(status: ExitStatus) -> i32 {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        status
            .code()
            .unwrap_or_else(|| status.signal().map_or(1, |s| 128 + s))
    }
    #[cfg(not(unix))]
    {
        status.code().unwrap_or(1)
    }
}

/// Copy `source` through `tee` chunk by chunk until EOF so the terminal sees
/// output live. A log failure stops reading and drops `source`, so the child
/// gets EPIPE on its next write instead of blocking on a full pipe.
fn pump<T: Write, L: Write>(mut source: impl Read, mut tee: Tee<T, L>) -> io::Result<()> {
    let mut buf = [0u8; 8192];
    loop {
        let n = match source.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        tee.write_all(&buf[..n])?;
    }
    tee.flush()?;
    if let Some(e) = tee.terminal_error() {
        warn!(error = %e, "terminal output stopped; log capture continued");
    }
    Ok(())
}

/// Run `argv[0]` with the remaining arguments, stdin inherited, and tee its
/// stdout/stderr to ours and to `log`. Blocks until the child exits.
///
/// A nonzero exit is returned as data. Only an empty `argv` or a failure to
/// start the process is an error.
pub fn execute<W: Write + Send>(argv: &[String], log: &mut W) -> Result<i32> {
    tee_child(argv, io::stdout(), io::stderr(), log)
}

fn tee_child<O, E, W>(argv: &[String], out: O, err: E, log: &mut W) -> Result<i32>
where
    O: Write + Send,
    E: Write + Send,
    W: Write + Send,
{
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| Error::InvalidArgument("no command given".to_string()))?;

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::inherit())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| Error::Spawn {
            program: program.clone(),
            source,
        })?;
    debug!(program = %program, pid = child.id(), "spawned");

    let stdout_pipe = child.stdout.take();
    let stderr_pipe = child.stderr.take();
    let log = Mutex::new(log);
    let log = &log;

    let pumped: Vec<io::Result<()>> = thread::scope(|scope| {
        let out_pump = stdout_pipe
            .map(|pipe| scope.spawn(move || pump(pipe, Tee::new(out, SharedSink(log)))));
        let err_pump = stderr_pipe
            .map(|pipe| scope.spawn(move || pump(pipe, Tee::new(err, SharedSink(log)))));
        [out_pump, err_pump]
            .into_iter()
            .flatten()
            .map(|handle| {
                handle.join().unwrap_or_else(|_| {
                    Err(io::Error::new(io::ErrorKind::Other, "output pump panicked"))
                })
            })
            .collect()
    });

    let status = child.wait()?;
    for result in pumped {
        if let Err(e) = result {
            warn!(program = %program, error = %e, "output capture incomplete");
        }
    }

    let code = exit_code_from_status(status);
    debug!(program = %program, exit_code = code, "exited");
    Ok(code)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|p| p.to_string()).collect()
    }

    fn captured(parts: &[&str]) -> (i32, String) {
        let mut log = Vec::new();
        let code = execute(&argv(parts), &mut log).unwrap();
        (code, String::from_utf8(log).unwrap())
    }

    struct Broken;

    impl Write for Broken {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    // --- Tee ---

    #[test]
    fn tee_mirrors_writes_to_terminal_and_log() {
        let mut terminal = Vec::new();
        let mut log = Vec::new();
        {
            let mut tee = Tee::new(&mut terminal, &mut log);
            tee.write_all(b"one\n").unwrap();
            tee.write_all(b"two\n").unwrap();
            tee.flush().unwrap();
            assert!(tee.terminal_error().is_none());
        }
        assert_eq!(log, b"one\ntwo\n");
        assert_eq!(terminal, log);
    }

    #[test]
    fn tee_keeps_logging_after_terminal_fails() {
        let mut log = Vec::new();
        {
            let mut tee = Tee::new(Broken, &mut log);
            tee.write_all(b"first\n").unwrap();
            tee.write_all(b"second\n").unwrap();
            let lost = tee.terminal_error().unwrap();
            assert_eq!(lost.kind(), io::ErrorKind::BrokenPipe);
        }
        assert_eq!(log, b"first\nsecond\n");
    }

    #[test]
    fn tee_reports_log_failure() {
        let mut terminal = Vec::new();
        let err = Tee::new(&mut terminal, Broken)
            .write_all(b"data")
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }

    #[test]
    fn pump_copies_everything_past_a_closed_terminal() {
        let data = vec![b'x'; 50_000];
        let mut log = Vec::new();
        pump(data.as_slice(), Tee::new(Broken, &mut log)).unwrap();
        assert_eq!(log, data);
    }

    #[test]
    fn pump_stops_reading_when_log_fails() {
        let mut source: &[u8] = &[b'y'; 20_000];
        let err = pump(&mut source, Tee::new(io::sink(), Broken)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
        assert_eq!(source.len(), 20_000 - 8192);
    }

    // --- execute ---

    #[test]
    fn echo_is_captured_in_log() {
        let (code, log) = captured(&["echo", "hello"]);
        assert_eq!(code, 0);
        assert_eq!(log, "hello\n");
    }

    #[test]
    fn false_reports_exit_one() {
        let (code, _) = captured(&["false"]);
        assert_eq!(code, 1);
    }

    #[test]
    fn specific_exit_code_is_returned_not_raised() {
        let (code, _) = captured(&["sh", "-c", "exit 42"]);
        assert_eq!(code, 42);
    }

    #[test]
    fn stderr_is_captured_too() {
        let (code, log) = captured(&["sh", "-c", "echo oops >&2; exit 3"]);
        assert_eq!(code, 3);
        assert_eq!(log, "oops\n");
    }

    #[test]
    fn both_streams_land_in_log() {
        let (_, log) = captured(&["sh", "-c", "echo out; echo err >&2"]);
        assert!(log.contains("out\n"));
        assert!(log.contains("err\n"));
    }

    #[test]
    fn per_stream_order_is_preserved() {
        let (_, log) = captured(&["sh", "-c", "for i in 1 2 3 4 5; do echo line$i; done"]);
        assert_eq!(log, "line1\nline2\nline3\nline4\nline5\n");
    }

    #[test]
    fn arguments_are_passed_literally() {
        let (_, log) = captured(&["echo", "hello world", "$HOME"]);
        assert_eq!(log, "hello world $HOME\n");
    }

    #[test]
    fn empty_argv_is_invalid() {
        let mut log = Vec::new();
        let err = execute(&[], &mut log).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn missing_program_is_spawn_error() {
        let mut log = Vec::new();
        let err = execute(&argv(&["definitely_not_a_real_binary_xyz"]), &mut log).unwrap_err();
        match err {
            Error::Spawn { program, .. } => assert_eq!(program, "definitely_not_a_real_binary_xyz"),
            other => panic!("expected spawn error, got {:?}", other),
        }
        assert!(log.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn signal_maps_to_128_plus_n() {
        // SIGTERM = 15
        let (code, _) = captured(&["sh", "-c", "kill -TERM $$"]);
        assert_eq!(code, 143);
    }

    #[test]
    fn closed_terminal_does_not_truncate_log() {
        let script = "i=0; while [ $i -lt 100000 ]; do echo x; i=$((i+1)); done";
        let mut log = Vec::new();
        let code = tee_child(&argv(&["sh", "-c", script]), Broken, Broken, &mut log).unwrap();
        assert_eq!(code, 0);
        assert_eq!(log.len(), 200_000);
        assert!(log.chunks(2).all(|line| line == b"x\n"));
    }

    #[cfg(unix)]
    #[test]
    fn failing_log_ends_endless_producer() {
        // `yes` never exits on its own. It dies of SIGPIPE (141) or exits on EPIPE.
        let code = tee_child(&argv(&["yes"]), io::sink(), io::sink(), &mut Broken).unwrap();
        assert_ne!(code, 0);
    }
}
