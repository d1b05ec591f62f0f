//! Per-target rendering of fan-out results, plus the command helpers that
//! glue a [`Dispatcher`] to them.

use std::future::Future;
use std::io::{self, Write};
use std::time::Duration;

use tonic::{Code, Request, Response, Status};
use tracing::warn;

use crate::dispatcher::{Dispatcher, TargetResponse};
use crate::services::{
    EXEC_RUN, ExecRequest, ExecResponse, GetVerbosityRequest, LOGGING_GET_VERBOSITY,
    LOGGING_SET_VERBOSITY, SetVerbosityRequest, VerbosityReply,
};

/// Deadline applied to the logging verbosity calls.
pub const VERBOSITY_TIMEOUT: Duration = Duration::from_secs(30);

/// Outcome of a command, mapped to a process exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    Success,
    Failure,
    UsageError,
}

impl ExitStatus {
    #[must_use]
    pub fn code(self) -> u8 {
        match self {
            Self::Success => 0,
            Self::Failure => 1,
            Self::UsageError => 2,
        }
    }
}

impl From<ExitStatus> for std::process::ExitCode {
    fn from(status: ExitStatus) -> Self {
        Self::from(status.code())
    }
}

/// One output and one error writer per target index.
#[derive(Debug)]
pub struct OutputState<W> {
    out: Vec<W>,
    err: Vec<W>,
}

impl<W: Write> OutputState<W> {
    /// # Errors
    ///
    /// Returns `InvalidInput` if the writer lists differ in length.
    pub fn new(out: Vec<W>, err: Vec<W>) -> io::Result<Self> {
        if out.len() != err.len() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} output writers but {} error writers", out.len(), err.len()),
            ));
        }
        Ok(Self { out, err })
    }

    #[must_use]
    pub fn targets(&self) -> usize {
        self.out.len()
    }

    /// # Errors
    ///
    /// Returns `InvalidInput` if there is no writer for `index`.
    pub fn out(&mut self, index: usize) -> io::Result<&mut W> {
        self.out.get_mut(index).ok_or_else(|| missing_writer(index))
    }

    /// # Errors
    ///
    /// Returns `InvalidInput` if there is no writer for `index`.
    pub fn err(&mut self, index: usize) -> io::Result<&mut W> {
        self.err.get_mut(index).ok_or_else(|| missing_writer(index))
    }

    /// Write the same line to every error writer.
    ///
    /// # Errors
    ///
    /// Propagates the first write failure.
    pub fn broadcast_err(&mut self, line: &str) -> io::Result<()> {
        for err in &mut self.err {
            writeln!(err, "{line}")?;
        }
        Ok(())
    }

    #[must_use]
    pub fn into_parts(self) -> (Vec<W>, Vec<W>) {
        (self.out, self.err)
    }
}

impl OutputState<Vec<u8>> {
    /// In-memory writers for `targets` targets.
    #[must_use]
    pub fn buffered(targets: usize) -> Self {
        Self {
            out: vec![Vec::new(); targets],
            err: vec![Vec::new(); targets],
        }
    }
}

fn missing_writer(index: usize) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidInput,
        format!("no writer for target index {index}"),
    )
}

fn describe(status: &Status) -> String {
    format!("{}: {}", code_name(status.code()), status.message())
}

fn code_name(code: Code) -> &'static str {
    match code {
        Code::Ok => "Ok",
        Code::Cancelled => "Cancelled",
        Code::Unknown => "Unknown",
        Code::InvalidArgument => "InvalidArgument",
        Code::DeadlineExceeded => "DeadlineExceeded",
        Code::NotFound => "NotFound",
        Code::AlreadyExists => "AlreadyExists",
        Code::PermissionDenied => "PermissionDenied",
        Code::ResourceExhausted => "ResourceExhausted",
        Code::FailedPrecondition => "FailedPrecondition",
        Code::Aborted => "Aborted",
        Code::OutOfRange => "OutOfRange",
        Code::Unimplemented => "Unimplemented",
        Code::Internal => "Internal",
        Code::Unavailable => "Unavailable",
        Code::DataLoss => "DataLoss",
        Code::Unauthenticated => "Unauthenticated",
    }
}

/// Render `Exec.Run` results: each target's stderr and stdout, or a failure
/// line for targets that errored.
///
/// # Errors
///
/// Propagates writer failures.
pub fn render_exec<W: Write>(
    state: &mut OutputState<W>,
    responses: Result<Vec<TargetResponse<ExecResponse>>, Status>,
) -> io::Result<ExitStatus> {
    let responses = match responses {
        Ok(responses) => responses,
        Err(status) => {
            state.broadcast_err(&format!(
                "Could not execute due to likely program failure: {}",
                describe(&status)
            ))?;
            return Ok(ExitStatus::Failure);
        }
    };

    let mut exit = ExitStatus::Success;
    for r in responses {
        match r.result {
            Ok(resp) => {
                if !resp.stderr.is_empty() {
                    state.err(r.index)?.write_all(&resp.stderr)?;
                }
                state.out(r.index)?.write_all(&resp.stdout)?;
            }
            Err(status) => {
                writeln!(
                    state.err(r.index)?,
                    "Command execution failure for target {} ({}) - error - {}",
                    r.target,
                    r.index,
                    describe(&status)
                )?;
                exit = ExitStatus::Failure;
            }
        }
    }
    Ok(exit)
}

/// Which verbosity call produced the replies being rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerbosityAction {
    Set,
    Get,
}

impl VerbosityAction {
    fn verb(self) -> &'static str {
        match self {
            Self::Set => "set",
            Self::Get => "get",
        }
    }

    fn gerund(self) -> &'static str {
        match self {
            Self::Set => "Setting",
            Self::Get => "Getting",
        }
    }

    fn level_label(self) -> &'static str {
        match self {
            Self::Set => "previous",
            Self::Get => "current",
        }
    }
}

/// Render the reply of a verbosity call made to the proxy itself. Both the
/// level and any failure go to the first target's writers.
///
/// # Errors
///
/// Propagates writer failures.
pub fn render_proxy_verbosity<W: Write>(
    state: &mut OutputState<W>,
    action: VerbosityAction,
    reply: Result<VerbosityReply, Status>,
) -> io::Result<ExitStatus> {
    match reply {
        Ok(reply) => {
            writeln!(
                state.out(0)?,
                "Proxy {} logging level {}",
                action.level_label(),
                reply.level
            )?;
            Ok(ExitStatus::Success)
        }
        Err(status) => {
            writeln!(
                state.err(0)?,
                "Could not {} proxy logging: {}",
                action.verb(),
                describe(&status)
            )?;
            Ok(ExitStatus::Failure)
        }
    }
}

/// Render `SetVerbosity`/`GetVerbosity` replies, one line per target.
///
/// # Errors
///
/// Propagates writer failures.
pub fn render_verbosity<W: Write>(
    state: &mut OutputState<W>,
    action: VerbosityAction,
    responses: Result<Vec<TargetResponse<VerbosityReply>>, Status>,
) -> io::Result<ExitStatus> {
    let responses = match responses {
        Ok(responses) => responses,
        Err(status) => {
            state.broadcast_err(&format!(
                "Could not {} logging: {}",
                action.verb(),
                describe(&status)
            ))?;
            return Ok(ExitStatus::Failure);
        }
    };

    let mut exit = ExitStatus::Success;
    for r in responses {
        match r.result {
            Ok(reply) => writeln!(
                state.out(r.index)?,
                "Target {} ({}) {} logging level {}",
                r.target,
                r.index,
                action.level_label(),
                reply.level
            )?,
            Err(status) => {
                writeln!(
                    state.err(r.index)?,
                    "{} logging verbosity for target {} ({}) returned error: {}",
                    action.gerund(),
                    r.target,
                    r.index,
                    describe(&status)
                )?;
                exit = ExitStatus::Failure;
            }
        }
    }
    Ok(exit)
}

/// Run `argv[0]` with the remaining arguments on every target.
///
/// # Errors
///
/// Propagates writer failures.
pub async fn run_exec<C, W, F, Fut>(
    dispatcher: &Dispatcher<C>,
    state: &mut OutputState<W>,
    argv: &[String],
    call: F,
) -> io::Result<ExitStatus>
where
    C: Clone,
    W: Write,
    F: Fn(C, Request<ExecRequest>) -> Fut,
    Fut: Future<Output = Result<Response<ExecResponse>, Status>>,
{
    let Some((command, args)) = argv.split_first() else {
        state.broadcast_err("Please specify a command to execute.")?;
        return Ok(ExitStatus::UsageError);
    };
    let request = ExecRequest {
        command: command.clone(),
        args: args.to_vec(),
    };
    let responses = dispatcher.one_many(EXEC_RUN, &request, call).await;
    render_exec(state, responses)
}

/// Set the logging level on every target and print the previous levels.
///
/// # Errors
///
/// Propagates writer failures.
pub async fn set_verbosity<C, W, F, Fut>(
    dispatcher: &Dispatcher<C>,
    state: &mut OutputState<W>,
    level: i32,
    call: F,
) -> io::Result<ExitStatus>
where
    C: Clone,
    W: Write,
    F: Fn(C, Request<SetVerbosityRequest>) -> Fut,
    Fut: Future<Output = Result<Response<VerbosityReply>, Status>>,
{
    let request = SetVerbosityRequest { level };
    let responses = dispatcher
        .one_many_within(VERBOSITY_TIMEOUT, LOGGING_SET_VERBOSITY, &request, call)
        .await;
    render_verbosity(state, VerbosityAction::Set, responses)
}

/// Print the current logging level of every target.
///
/// # Errors
///
/// Propagates writer failures.
pub async fn get_verbosity<C, W, F, Fut>(
    dispatcher: &Dispatcher<C>,
    state: &mut OutputState<W>,
    call: F,
) -> io::Result<ExitStatus>
where
    C: Clone,
    W: Write,
    F: Fn(C, Request<GetVerbosityRequest>) -> Fut,
    Fut: Future<Output = Result<Response<VerbosityReply>, Status>>,
{
    let responses = dispatcher
        .one_many_within(
            VERBOSITY_TIMEOUT,
            LOGGING_GET_VERBOSITY,
            &GetVerbosityRequest,
            call,
        )
        .await;
    render_verbosity(state, VerbosityAction::Get, responses)
}

/// Set the logging level of the proxy itself and print its previous level.
///
/// # Errors
///
/// Propagates writer failures.
pub async fn set_proxy_verbosity<C, P, W, F, Fut>(
    dispatcher: &Dispatcher<C>,
    proxy: P,
    state: &mut OutputState<W>,
    level: i32,
    call: F,
) -> io::Result<ExitStatus>
where
    C: Clone,
    W: Write,
    F: FnOnce(P, Request<SetVerbosityRequest>) -> Fut,
    Fut: Future<Output = Result<Response<VerbosityReply>, Status>>,
{
    warn_multiple_targets(state.targets());
    let request = SetVerbosityRequest { level };
    let reply = dispatcher
        .one_within(proxy, VERBOSITY_TIMEOUT, LOGGING_SET_VERBOSITY, &request, call)
        .await;
    render_proxy_verbosity(state, VerbosityAction::Set, reply)
}

/// Print the current logging level of the proxy itself.
///
/// # Errors
///
/// Propagates writer failures.
pub async fn get_proxy_verbosity<C, P, W, F, Fut>(
    dispatcher: &Dispatcher<C>,
    proxy: P,
    state: &mut OutputState<W>,
    call: F,
) -> io::Result<ExitStatus>
where
    C: Clone,
    W: Write,
    F: FnOnce(P, Request<GetVerbosityRequest>) -> Fut,
    Fut: Future<Output = Result<Response<VerbosityReply>, Status>>,
{
    warn_multiple_targets(state.targets());
    let reply = dispatcher
        .one_within(
            proxy,
            VERBOSITY_TIMEOUT,
            LOGGING_GET_VERBOSITY,
            &GetVerbosityRequest,
            call,
        )
        .await;
    render_proxy_verbosity(state, VerbosityAction::Get, reply)
}

fn warn_multiple_targets(targets: usize) {
    if targets > 1 {
        warn!(targets, "can't call proxy logging with multiple targets");
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use tracing_test::traced_test;

    use super::*;

    fn exec_ok(index: usize, stdout: &str, stderr: &str) -> TargetResponse<ExecResponse> {
        TargetResponse {
            target: format!("t{index}"),
            index,
            result: Ok(ExecResponse {
                stdout: stdout.as_bytes().to_vec(),
                stderr: stderr.as_bytes().to_vec(),
                ret_code: 0,
            }),
        }
    }

    fn text(buf: &[u8]) -> &str {
        std::str::from_utf8(buf).unwrap()
    }

    #[test]
    fn exec_writes_per_target_streams() {
        let mut state = OutputState::buffered(2);
        let exit = render_exec(
            &mut state,
            Ok(vec![
                exec_ok(0, "hello\n", ""),
                TargetResponse {
                    target: "t1".to_owned(),
                    index: 1,
                    result: Err(Status::permission_denied("policy does not permit this request")),
                },
            ]),
        )
        .unwrap();

        assert_eq!(exit, ExitStatus::Failure);
        let (out, err) = state.into_parts();
        assert_eq!(text(&out[0]), "hello\n");
        assert_eq!(text(&err[0]), "");
        assert_eq!(text(&out[1]), "");
        assert_eq!(
            text(&err[1]),
            "Command execution failure for target t1 (1) - error - PermissionDenied: policy does not permit this request\n"
        );
    }

    #[test]
    fn exec_stderr_goes_to_error_writer() {
        let mut state = OutputState::buffered(1);
        let exit = render_exec(&mut state, Ok(vec![exec_ok(0, "out", "warn")])).unwrap();
        assert_eq!(exit, ExitStatus::Success);
        let (out, err) = state.into_parts();
        assert_eq!(text(&out[0]), "out");
        assert_eq!(text(&err[0]), "warn");
    }

    #[test]
    fn global_failure_reaches_every_error_writer() {
        let mut state = OutputState::buffered(3);
        let exit = render_verbosity(
            &mut state,
            VerbosityAction::Get,
            Err(Status::deadline_exceeded("too slow")),
        )
        .unwrap();
        assert_eq!(exit, ExitStatus::Failure);
        for err in state.into_parts().1 {
            assert_eq!(text(&err), "Could not get logging: DeadlineExceeded: too slow\n");
        }
    }

    #[test]
    fn verbosity_lines() {
        let mut state = OutputState::buffered(1);
        render_verbosity(
            &mut state,
            VerbosityAction::Set,
            Ok(vec![TargetResponse {
                target: "db-1:50042".to_owned(),
                index: 0,
                result: Ok(VerbosityReply { level: 2 }),
            }]),
        )
        .unwrap();
        assert_eq!(
            text(&state.into_parts().0[0]),
            "Target db-1:50042 (0) previous logging level 2\n"
        );
    }

    #[test]
    fn proxy_verbosity_uses_first_writers() {
        let mut state = OutputState::buffered(2);
        let exit = render_proxy_verbosity(
            &mut state,
            VerbosityAction::Get,
            Ok(VerbosityReply { level: 4 }),
        )
        .unwrap();
        assert_eq!(exit, ExitStatus::Success);
        let (out, _) = state.into_parts();
        assert_eq!(text(&out[0]), "Proxy current logging level 4\n");
        assert_eq!(text(&out[1]), "");

        let mut state = OutputState::buffered(1);
        let exit = render_proxy_verbosity(
            &mut state,
            VerbosityAction::Set,
            Err(Status::unavailable("proxy down")),
        )
        .unwrap();
        assert_eq!(exit, ExitStatus::Failure);
        assert_eq!(
            text(&state.into_parts().1[0]),
            "Could not set proxy logging: Unavailable: proxy down\n"
        );
    }

    #[test]
    #[traced_test]
    fn proxy_call_with_many_targets_warns() {
        warn_multiple_targets(1);
        assert!(!logs_contain("multiple targets"));
        warn_multiple_targets(3);
        assert!(logs_contain("can't call proxy logging with multiple targets"));
    }

    #[test]
    fn mismatched_writers_are_rejected() {
        let err = OutputState::new(vec![Vec::<u8>::new()], vec![]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn unknown_index_is_an_error() {
        let mut state = OutputState::buffered(1);
        assert!(render_exec(&mut state, Ok(vec![exec_ok(4, "x", "")])).is_err());
    }

    #[test]
    fn exit_codes() {
        assert_eq!(ExitStatus::Success.code(), 0);
        assert_eq!(ExitStatus::Failure.code(), 1);
        assert_eq!(ExitStatus::UsageError.code(), 2);
    }
}
