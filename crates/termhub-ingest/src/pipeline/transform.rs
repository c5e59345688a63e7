//! Line-oriented stream transforms
//!
//! [`LineTransform`] is a lazy `Read` adapter: it pulls one input line at a
//! time, hands it to a callback that appends any output bytes, and serves
//! those bytes to the next reader. The callback receives `None` once the
//! input is exhausted, so it can flush buffered state.

use std::io::{self, BufRead, BufReader, Read};

use super::Stream;

pub struct LineTransform<R, F> {
    input: BufReader<R>,
    callback: F,
    line: Vec<u8>,
    output: Vec<u8>,
    position: usize,
    finished: bool,
}

impl<R, F> LineTransform<R, F>
where
    R: Read,
    F: FnMut(Option<&str>, &mut Vec<u8>) -> io::Result<()>,
{
    pub fn new(input: R, callback: F) -> Self {
        Self {
            input: BufReader::new(input),
            callback,
            line: Vec::new(),
            output: Vec::new(),
            position: 0,
            finished: false,
        }
    }

    fn refill(&mut self) -> io::Result<()> {
        self.output.clear();
        self.position = 0;
        self.line.clear();

        if self.input.read_until(b'\n', &mut self.line)? == 0 {
            self.finished = true;
            return (self.callback)(None, &mut self.output);
        }
        while matches!(self.line.last(), Some(b'\n' | b'\r')) {
            self.line.pop();
        }
        let line = String::from_utf8_lossy(&self.line);
        (self.callback)(Some(&line), &mut self.output)
    }
}

impl<R, F> Read for LineTransform<R, F>
where
    R: Read,
    F: FnMut(Option<&str>, &mut Vec<u8>) -> io::Result<()>,
{
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.position >= self.output.len() {
            if self.finished {
                return Ok(0);
            }
            self.refill()?;
        }
        let n = buf.len().min(self.output.len() - self.position);
        buf[..n].copy_from_slice(&self.output[self.position..self.position + n]);
        self.position += n;
        Ok(n)
    }
}

/// Box a line transform over a pipeline stream
pub fn line_transform<'a, F>(stream: Stream<'a>, callback: F) -> Stream<'a>
where
    F: FnMut(Option<&str>, &mut Vec<u8>) -> io::Result<()> + 'a,
{
    Box::new(LineTransform::new(stream, callback))
}
