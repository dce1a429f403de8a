//! Output sinks: where a formatter's bytes end up.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, Command as Process, Stdio};

use log::{debug, warn};

use crate::bind::DynOptions;
use crate::commands::{CompletionRequest, Sink, options_of};
use crate::error::ExecError;
use crate::repl::{Context, SharedBuffer};

#[derive(Debug, Default)]
pub struct FileOptions {
    pub path: PathBuf,
    pub append: bool,
}

#[derive(Debug, Default)]
pub struct ShellOptions {
    pub command: String,
}

crate::bind_options! {
    FileOptions {
        path: "*=#1",
        append: "*=a|append",
    }
    ShellOptions {
        command: "*=#1",
    }
}

/// The process's standard output.
pub struct Stdout;

impl Sink for Stdout {
    fn new_sink(
        &self,
        _options: &dyn DynOptions,
        _ctx: &Context,
    ) -> Result<Box<dyn Write + Send>, ExecError> {
        Ok(Box::new(io::stdout()))
    }
}

/// `> path` or `| file [-append] PATH`. A leading `~` is expanded.
pub struct File;

impl Sink for File {
    fn new_options(&self, _ctx: &Context) -> Box<dyn DynOptions> {
        Box::new(FileOptions::default())
    }

    fn complete(&self, _ctx: &Context, req: &mut CompletionRequest) {
        let typed = shellexpand::tilde(&req.word).into_owned();
        let (dir, prefix) = match typed.rfind('/') {
            Some(i) => (typed[..=i].to_string(), &typed[i + 1..]),
            None => (String::new(), typed.as_str()),
        };
        let Ok(entries) = std::fs::read_dir(if dir.is_empty() { "." } else { dir.as_str() }) else {
            return;
        };
        // Candidates keep the word as typed, unexpanded.
        let keep = req.word.len().saturating_sub(prefix.len());
        let shown = req.word[..keep].to_string();
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with(prefix) {
                req.add(format!("{shown}{name}"));
            }
        }
    }

    fn new_sink(
        &self,
        options: &dyn DynOptions,
        _ctx: &Context,
    ) -> Result<Box<dyn Write + Send>, ExecError> {
        let opts = options_of::<FileOptions>("file", options)?;
        let path = PathBuf::from(shellexpand::tilde(&opts.path.to_string_lossy()).as_ref());
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .append(opts.append)
            .truncate(!opts.append)
            .open(&path)
            .map_err(|e| ExecError::failed(format!("{}: {e}", path.display())))?;
        debug!("writing output to {}", path.display());
        Ok(Box::new(file))
    }
}

/// `| sh CMD`, `| !CMD` or `! CMD`: pipe formatted output into a program.
///
/// The command line is split with shell quoting rules but not run through a
/// shell. The program's own stdout and stderr are inherited.
pub struct Shell;

impl Sink for Shell {
    fn new_options(&self, _ctx: &Context) -> Box<dyn DynOptions> {
        Box::new(ShellOptions::default())
    }

    fn new_sink(
        &self,
        options: &dyn DynOptions,
        _ctx: &Context,
    ) -> Result<Box<dyn Write + Send>, ExecError> {
        let opts = options_of::<ShellOptions>("sh", options)?;
        let words = shlex::split(&opts.command)
            .ok_or_else(|| ExecError::failed(format!("sh: cannot parse {:?}", opts.command)))?;
        let Some((program, args)) = words.split_first() else {
            return Err(ExecError::failed("sh: empty command"));
        };
        let mut child = Process::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .spawn()
            .map_err(|e| ExecError::failed(format!("sh: {program}: {e}")))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ExecError::failed(format!("sh: {program}: no stdin")))?;
        debug!("piping output to {program} (pid {})", child.id());
        Ok(Box::new(ShellWriter {
            program: program.clone(),
            stdin: Some(stdin),
            child,
        }))
    }
}

/// Writes into a child's stdin; dropping it closes stdin and reaps the child.
struct ShellWriter {
    program: String,
    stdin: Option<ChildStdin>,
    child: Child,
}

impl Write for ShellWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match &mut self.stdin {
            Some(stdin) => stdin.write(buf),
            None => Err(io::Error::from(io::ErrorKind::BrokenPipe)),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match &mut self.stdin {
            Some(stdin) => stdin.flush(),
            None => Ok(()),
        }
    }
}

impl Drop for ShellWriter {
    fn drop(&mut self) {
        drop(self.stdin.take());
        match self.child.wait() {
            Ok(status) if status.success() => {}
            Ok(status) => warn!("{} exited with {status}", self.program),
            Err(e) => warn!("could not wait for {}: {e}", self.program),
        }
    }
}

/// In-memory sink, mostly for tests and embedding.
#[derive(Debug, Clone, Default)]
pub struct Buffer(pub SharedBuffer);

impl Buffer {
    pub fn contents(&self) -> String {
        self.0.contents()
    }
}

impl Sink for Buffer {
    fn new_sink(
        &self,
        _options: &dyn DynOptions,
        _ctx: &Context,
    ) -> Result<Box<dyn Write + Send>, ExecError> {
        Ok(Box::new(self.0.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::testing::run;

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("opsh-sinks-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir.join(name)
    }

    #[test]
    fn file_redirection_truncates() {
        let path = scratch("truncate.txt");
        std::fs::write(&path, "old contents\n").unwrap();
        let (out, diag) = run(&[&format!("seq 2 > {}", path.display())]);
        assert_eq!((out.as_str(), diag.as_str()), ("", ""));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "1\n2\n");
    }

    #[test]
    fn file_sink_appends_on_request() {
        let path = scratch("append.txt");
        let _ = std::fs::remove_file(&path);
        let line = format!("seq 2 | file -a {}", path.display());
        run(&[&line, &line]);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "1\n2\n1\n2\n");
    }

    #[test]
    fn unopenable_file_is_an_execution_error() {
        let (_, diag) = run(&["seq 1 > /nonexistent-opsh-dir/out.txt"]);
        assert!(diag.contains("/nonexistent-opsh-dir/out.txt"), "{diag}");
    }

    #[cfg(unix)]
    #[test]
    fn shell_sink_feeds_stdin() {
        let path = scratch("shell.txt");
        let (_, diag) = run(&[&format!("seq 3 | sh tee {}", path.display())]);
        assert_eq!(diag, "");
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "1\n2\n3\n");
    }

    #[test]
    fn missing_program_fails_the_request() {
        let (_, diag) = run(&["seq 1 ! opsh-no-such-program-here"]);
        assert!(diag.contains("opsh-no-such-program-here"), "{diag}");
    }

    #[test]
    fn completes_file_names() {
        let path = scratch("complete-me.txt");
        std::fs::write(&path, "").unwrap();
        let dir = path.parent().unwrap().display().to_string();
        let mut req = CompletionRequest {
            command: "file".into(),
            word: format!("{dir}/complete-"),
            ..CompletionRequest::default()
        };
        File.complete(&Context::new(), &mut req);
        assert_eq!(req.candidates, [format!("{dir}/complete-me.txt")]);
    }
}
