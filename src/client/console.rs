//! Line-oriented console front-end.
//!
//! Each input line becomes a [`Request`]; the response is rendered and its
//! status drives what happens next: build a payload and resend on
//! `OBJECT_REQUIRED`, run a script file on `EXECUTE_SCRIPT`, stop on `EXIT`.

use super::builder::{BuildError, InputMode, TicketBuilder};
use super::Client;
use crate::protocol::{Request, Response, ResponseStatus};
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Anything that can answer a request.
pub trait Transport {
    fn send(&mut self, request: &Request) -> Response;
}

impl Transport for Client {
    fn send(&mut self, request: &Request) -> Response {
        Client::send(self, request)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

pub struct Console<T, W, E> {
    transport: T,
    out: W,
    err: E,
    /// Canonical paths of the scripts currently executing, outermost first.
    scripts: Vec<PathBuf>,
}

impl<T: Transport, W: Write, E: Write> Console<T, W, E> {
    pub fn new(transport: T, out: W, err: E) -> Self {
        Self {
            transport,
            out,
            err,
            scripts: Vec::new(),
        }
    }

    pub fn into_transport(self) -> T {
        self.transport
    }

    /// Read commands from `input` until `exit` or end of input.
    pub fn run(&mut self, input: &mut dyn BufRead) -> io::Result<()> {
        writeln!(
            self.out,
            "Ticket collection client. Type \"help\" for the list of commands."
        )?;

        loop {
            write!(self.out, "$ ")?;
            self.out.flush()?;

            let mut line = String::new();
            if input.read_line(&mut line)? == 0 {
                writeln!(self.out, "End of input")?;
                return Ok(());
            }
            if self.execute_line(&line, input, InputMode::Interactive)? == Flow::Exit {
                return Ok(());
            }
        }
    }

    /// Send one console line. `input` supplies payload fields if needed.
    pub fn execute_line(
        &mut self,
        line: &str,
        input: &mut dyn BufRead,
        mode: InputMode,
    ) -> io::Result<Flow> {
        let request = Request::parse_line(line);
        if request.is_empty() {
            return Ok(Flow::Continue);
        }

        let response = self.transport.send(&request);
        match response.status {
            ResponseStatus::ObjectRequired => {
                writeln!(self.out, "{}", response.message)?;
                self.resend_with_payload(request, input, mode)
            }
            ResponseStatus::ExecuteScript => self.run_script(Path::new(&response.message)),
            ResponseStatus::Exit => {
                writeln!(self.out, "Goodbye")?;
                Ok(Flow::Exit)
            }
            _ => {
                self.render(&response)?;
                Ok(Flow::Continue)
            }
        }
    }

    fn resend_with_payload(
        &mut self,
        request: Request,
        input: &mut dyn BufRead,
        mode: InputMode,
    ) -> io::Result<Flow> {
        let ticket = match TicketBuilder::new(input, &mut self.out, mode).build() {
            Ok(ticket) => ticket,
            Err(BuildError::Io(e)) => return Err(e),
            Err(e) => {
                writeln!(self.err, "Ticket not built: {e}")?;
                return Ok(Flow::Continue);
            }
        };

        let response = self.transport.send(&request.with_payload(ticket));
        self.render(&response)?;
        Ok(Flow::Continue)
    }

    fn render(&mut self, response: &Response) -> io::Result<()> {
        let prefix = match response.status {
            ResponseStatus::Ok => {
                writeln!(self.out, "{}", response.message)?;
                for ticket in response.result_set.iter().flatten() {
                    writeln!(self.out, "{ticket}")?;
                }
                return Ok(());
            }
            ResponseStatus::CommandError => "Command failed",
            ResponseStatus::ArgsError => "Invalid arguments",
            ResponseStatus::NoSuchCommand => "Unknown command",
            ResponseStatus::ValidationError => "Invalid ticket",
            ResponseStatus::ServerError => "Server error",
            ResponseStatus::ObjectRequired
            | ResponseStatus::ExecuteScript
            | ResponseStatus::Exit => "Unexpected response",
        };
        writeln!(self.err, "{prefix}: {}", response.message)
    }

    /// Run every line of a script file through the client.
    ///
    /// A script that is already on the execution stack is refused.
    pub fn run_script(&mut self, path: &Path) -> io::Result<Flow> {
        let canonical = match fs::canonicalize(path) {
            Ok(canonical) => canonical,
            Err(e) => {
                writeln!(self.err, "Script '{}' not found: {e}", path.display())?;
                return Ok(Flow::Continue);
            }
        };
        if self.scripts.contains(&canonical) {
            writeln!(
                self.err,
                "Script '{}' is already running; recursive execution refused",
                path.display()
            )?;
            return Ok(Flow::Continue);
        }
        let file = match File::open(&canonical) {
            Ok(file) => file,
            Err(e) => {
                writeln!(self.err, "Script '{}' cannot be opened: {e}", path.display())?;
                return Ok(Flow::Continue);
            }
        };

        writeln!(self.out, "* Running script '{}'", path.display())?;
        debug!(script = %canonical.display(), depth = self.scripts.len() + 1, "Script started");
        self.scripts.push(canonical);
        let flow = self.run_script_lines(&mut BufReader::new(file));
        self.scripts.pop();
        writeln!(self.out, "* Script '{}' finished", path.display())?;
        flow
    }

    fn run_script_lines(&mut self, reader: &mut dyn BufRead) -> io::Result<Flow> {
        let mut line = String::new();
        loop {
            line.clear();
            if reader.read_line(&mut line)? == 0 {
                return Ok(Flow::Continue);
            }
            if self.execute_line(&line, reader, InputMode::Script)? == Flow::Exit {
                return Ok(Flow::Exit);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::tests::sample_ticket;
    use std::io::Cursor;

    /// Answers from a closure and records every request.
    struct Scripted<F> {
        answer: F,
        sent: Vec<Request>,
    }

    impl<F: FnMut(&Request) -> Response> Transport for Scripted<F> {
        fn send(&mut self, request: &Request) -> Response {
            self.sent.push(request.clone());
            (self.answer)(request)
        }
    }

    fn server_like(request: &Request) -> Response {
        match request.command_name.as_str() {
            "show" => Response::ok("1 items").with_records(vec![sample_ticket(1, "opera", 9.0)]),
            "add" if request.payload.is_none() => Response::object_required("ticket needed"),
            "add" => Response::ok("ticket 1 added"),
            "execute_script" => {
                Response::new(ResponseStatus::ExecuteScript, request.args[0].clone())
            }
            "exit" => Response::new(ResponseStatus::Exit, "bye"),
            name => Response::no_such_command(name),
        }
    }

    type TestConsole = Console<Scripted<fn(&Request) -> Response>, Vec<u8>, Vec<u8>>;

    fn console() -> TestConsole {
        Console::new(
            Scripted {
                answer: server_like as fn(&Request) -> Response,
                sent: Vec::new(),
            },
            Vec::new(),
            Vec::new(),
        )
    }

    fn run(console: &mut TestConsole, input: &str) {
        console
            .run(&mut Cursor::new(input.as_bytes().to_vec()))
            .unwrap();
    }

    fn text(buf: &[u8]) -> String {
        String::from_utf8_lossy(buf).into_owned()
    }

    fn sent_names(console: &TestConsole) -> Vec<String> {
        console
            .transport
            .sent
            .iter()
            .map(|r| r.command_name.clone())
            .collect()
    }

    #[test]
    fn test_renders_and_skips_blank_lines() {
        let mut console = console();
        run(&mut console, "\n   \nshow\nfrobnicate\n");

        assert_eq!(sent_names(&console), ["show", "frobnicate"]);
        let out = text(&console.out);
        assert!(out.contains("1 items"));
        assert!(out.contains("opera"));
        assert!(out.contains("End of input"));
        assert!(text(&console.err).contains("Unknown command"));
    }

    #[test]
    fn test_object_required_builds_and_resends() {
        let mut console = console();
        run(&mut console, "add\nOpera\n1.5\n10\n42.5\n15\n\nVIP\n\n180\n75\n");

        let sent = &console.transport.sent;
        assert_eq!(sent.len(), 2);
        assert!(sent[0].payload.is_none());
        assert_eq!(sent[1].command_name, "add");
        assert_eq!(sent[1].payload.as_ref().unwrap().name, "Opera");
        assert!(text(&console.out).contains("ticket 1 added"));
    }

    #[test]
    fn test_exit_stops_loop() {
        let mut console = console();
        run(&mut console, "exit\nshow\n");
        assert_eq!(sent_names(&console), ["exit"]);
        assert!(!text(&console.out).contains("End of input"));
    }

    #[test]
    fn test_script_runs_with_payload_lines() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("fill.txt");
        fs::write(&script, "show\nadd\nOpera\n1.5\n10\n42.5\n15\n\nVIP\n\n180\n75\n").unwrap();

        let mut console = console();
        run(&mut console, &format!("execute_script {}\n", script.display()));

        assert_eq!(sent_names(&console), ["execute_script", "show", "add", "add"]);
        let out = text(&console.out);
        assert!(out.contains("* Running script"));
        assert!(out.contains("* Script"));
        assert!(!out.contains("try again"));
    }

    #[test]
    fn test_script_recursion_refused() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("loop.txt");
        fs::write(&script, format!("show\nexecute_script {}\n", script.display())).unwrap();

        let mut console = console();
        run(&mut console, &format!("execute_script {}\n", script.display()));

        assert_eq!(
            sent_names(&console),
            ["execute_script", "show", "execute_script"]
        );
        assert!(text(&console.err).contains("recursive execution refused"));
        assert!(console.scripts.is_empty());
    }

    #[test]
    fn test_missing_script_reported() {
        let mut console = console();
        run(&mut console, "execute_script /definitely/not/here.txt\n");
        assert!(text(&console.err).contains("not found"));
    }

    #[test]
    fn test_exit_inside_script_ends_session() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("bye.txt");
        fs::write(&script, "exit\nshow\n").unwrap();

        let mut console = console();
        run(&mut console, &format!("execute_script {}\nshow\n", script.display()));
        assert_eq!(sent_names(&console), ["execute_script", "exit"]);
    }
}
