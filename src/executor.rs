use std::{
    io::{self, Write},
    process::{Command, Output, Stdio},
    thread,
};

use crate::{logging::*, Error, Executor, Result};

impl Executor {
    pub fn run<S: AsRef<str>>(&self, program: &str, args: &[S]) -> Result<String> {
        let command = render(program, args);
        debug!("running command: {}", &command);
        let output = Command::new(program)
            .args(args.iter().map(AsRef::as_ref))
            .stdin(Stdio::null())
            .output()
            .map_err(|source| Error::Exec { command: command.clone(), source })?;
        check(command, output)
    }

    /// Runs `program`, feeding `input` on its stdin and waiting for it to exit.
    pub fn run_with_input<S: AsRef<str>>(
        &self,
        program: &str,
        args: &[S],
        input: &str,
    ) -> Result<String> {
        let command = render(program, args);
        debug!("running command: {} ({} bytes on stdin)", &command, input.len());
        let exec_err = |source| Error::Exec { command: command.clone(), source };

        let mut child = Command::new(program)
            .args(args.iter().map(AsRef::as_ref))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(exec_err)?;

        // the writer owns stdin so the pipe closes (EOF) when it is done, while
        // wait_with_output drains stdout and stderr; a child that exits without
        // reading is judged by its exit status alone
        let writer = child.stdin.take().map(|mut stdin| {
            let input = input.to_owned();
            thread::spawn(move || match stdin.write_all(input.as_bytes()) {
                Err(e) if e.kind() != io::ErrorKind::BrokenPipe => Err(e),
                _ => Ok(()),
            })
        });
        let output = child.wait_with_output().map_err(exec_err)?;
        if let Some(writer) = writer {
            writer
                .join()
                .unwrap_or_else(|_| Err(io::Error::other("stdin writer panicked")))
                .map_err(exec_err)?;
        }
        check(command, output)
    }
}

fn check(command: String, output: Output) -> Result<String> {
    match output.status.code() {
        Some(0) => Ok(String::from_utf8_lossy(&output.stdout).trim_end().to_owned()),
        Some(code) => Err(Error::Exit {
            command,
            code,
            stderr: String::from_utf8_lossy(&output.stderr).trim_end().to_owned(),
        }),
        None => Err(Error::Terminated { command }),
    }
}

fn render<S: AsRef<str>>(program: &str, args: &[S]) -> String {
    std::iter::once(program)
        .chain(args.iter().map(AsRef::as_ref))
        .collect::<Vec<_>>()
        .join(" ")
}
