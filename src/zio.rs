//! Stream helpers for the loaders.
//!
//! A path of `-` denotes stdin/stdout. Paths ending in `.gz` are streamed
//! through an external `gzip` child process; the child's lifetime is
//! bounded by the returned handle, which reaps it on drop.

use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

use crate::{Error, Result};

pub fn open_reader(path: &str) -> Result<Box<dyn BufRead>> {
    if path == "-" {
        return Ok(Box::new(BufReader::new(io::stdin())));
    }
    if !Path::new(path).exists() {
        return Err(Error::FileNotFound(path.to_string()));
    }
    if path.ends_with(".gz") {
        let mut child = Command::new("gzip")
            .arg("-dc")
            .arg(path)
            .stdout(Stdio::piped())
            .spawn()?;
        let stdout = child.stdout.take().ok_or_else(|| {
            io::Error::new(io::ErrorKind::BrokenPipe, "no stdout from decompressor")
        })?;
        return Ok(Box::new(BufReader::new(DecompressReader { child, stdout })));
    }
    Ok(Box::new(BufReader::new(File::open(path)?)))
}

pub fn open_writer(path: &str) -> Result<Box<dyn Write>> {
    if path == "-" {
        return Ok(Box::new(BufWriter::new(io::stdout())));
    }
    if path.ends_with(".gz") {
        let mut child = Command::new("gzip")
            .arg("-c")
            .stdin(Stdio::piped())
            .stdout(Stdio::from(File::create(path)?))
            .spawn()?;
        let stdin = child.stdin.take().ok_or_else(|| {
            io::Error::new(io::ErrorKind::BrokenPipe, "no stdin to compressor")
        })?;
        return Ok(Box::new(CompressWriter {
            child,
            stdin: Some(stdin),
        }));
    }
    Ok(Box::new(BufWriter::new(File::create(path)?)))
}

struct DecompressReader {
    child: Child,
    stdout: ChildStdout,
}

impl Read for DecompressReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stdout.read(buf)
    }
}

impl Drop for DecompressReader {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

struct CompressWriter {
    child: Child,
    stdin: Option<ChildStdin>,
}

impl Write for CompressWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match &mut self.stdin {
            Some(stdin) => stdin.write(buf),
            None => Err(io::Error::new(io::ErrorKind::BrokenPipe, "writer closed")),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match &mut self.stdin {
            Some(stdin) => stdin.flush(),
            None => Ok(()),
        }
    }
}

impl Drop for CompressWriter {
    fn drop(&mut self) {
        // Close the pipe so the compressor sees EOF, then reap it.
        self.stdin = None;
        let _ = self.child.wait();
    }
}
