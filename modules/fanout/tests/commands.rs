#![allow(clippy::unwrap_used, clippy::expect_used)]

//! Command helpers driven end to end through an authorizing dispatcher

use std::future::{Ready, ready};
use std::sync::Arc;
use std::sync::atomic::{AtomicI32, Ordering};
use std::time::Duration;

use fanout::services::{
    ExecRequest, ExecResponse, GetVerbosityRequest, SetVerbosityRequest, VerbosityReply,
};
use fanout::{
    Dispatcher, ExitStatus, OutputState, Target, get_proxy_verbosity, get_verbosity, run_exec,
    set_proxy_verbosity, set_verbosity,
};
use rpc_authz::Authorizer;
use tonic::{Request, Response, Status};

const POLICY: &str = r#"
rules:
  - name: echo-only
    effect: allow
    methods: ["/Exec.Exec/Run"]
    message: { command: /bin/echo }
  - name: read-verbosity
    effect: allow
    methods: ["/Logging.Logging/GetVerbosity"]
  - name: set-verbosity-on-web
    effect: allow
    methods: ["/Logging.Logging/SetVerbosity"]
    metadata: { x-fleet-target: web-1 }
"#;

#[derive(Debug, Clone)]
struct Host {
    level: Arc<AtomicI32>,
    hang: bool,
}

fn fleet(hosts: &[(&str, bool)]) -> Dispatcher<Host> {
    let authz = Authorizer::with_policy_document(POLICY, vec![]).unwrap();
    let targets = hosts
        .iter()
        .map(|(name, hang)| Target {
            name: (*name).to_owned(),
            conn: Host {
                level: Arc::new(AtomicI32::new(1)),
                hang: *hang,
            },
        })
        .collect();
    Dispatcher::new(authz, targets)
}

fn exec(_host: Host, req: Request<ExecRequest>) -> Ready<Result<Response<ExecResponse>, Status>> {
    let req = req.into_inner();
    ready(Ok(Response::new(ExecResponse {
        stdout: format!("{}\n", req.args.join(" ")).into_bytes(),
        stderr: Vec::new(),
        ret_code: 0,
    })))
}

fn set_level(
    host: Host,
    req: Request<SetVerbosityRequest>,
) -> Ready<Result<Response<VerbosityReply>, Status>> {
    let previous = host.level.swap(req.into_inner().level, Ordering::SeqCst);
    ready(Ok(Response::new(VerbosityReply { level: previous })))
}

async fn get_level(
    host: Host,
    _req: Request<GetVerbosityRequest>,
) -> Result<Response<VerbosityReply>, Status> {
    if host.hang {
        std::future::pending::<()>().await;
    }
    Ok(Response::new(VerbosityReply {
        level: host.level.load(Ordering::SeqCst),
    }))
}

fn text(buf: &[u8]) -> String {
    String::from_utf8(buf.to_vec()).unwrap()
}

#[tokio::test]
async fn exec_renders_each_target() {
    let fleet = fleet(&[("web-1", false), ("db-1", false)]);
    let mut state = OutputState::buffered(fleet.len());
    let argv: Vec<String> = ["/bin/echo", "hello", "fleet"]
        .iter()
        .map(|s| (*s).to_owned())
        .collect();

    let exit = run_exec(&fleet, &mut state, &argv, exec).await.unwrap();

    assert_eq!(exit, ExitStatus::Success);
    let (out, err) = state.into_parts();
    assert_eq!(text(&out[0]), "hello fleet\n");
    assert_eq!(text(&out[1]), "hello fleet\n");
    assert!(err.iter().all(Vec::is_empty));
}

#[tokio::test]
async fn exec_denied_by_policy_fails_per_target() {
    let fleet = fleet(&[("web-1", false)]);
    let mut state = OutputState::buffered(1);
    let argv = vec!["/bin/rm".to_owned(), "-rf".to_owned(), "/".to_owned()];

    let exit = run_exec(&fleet, &mut state, &argv, exec).await.unwrap();

    assert_eq!(exit, ExitStatus::Failure);
    let (out, err) = state.into_parts();
    assert!(out[0].is_empty());
    assert_eq!(
        text(&err[0]),
        "Command execution failure for target web-1 (0) - error - PermissionDenied: policy does not permit this request\n"
    );
}

#[tokio::test]
async fn exec_without_command_is_usage_error() {
    let fleet = fleet(&[("web-1", false), ("db-1", false)]);
    let mut state = OutputState::buffered(2);

    let exit = run_exec(&fleet, &mut state, &[], exec).await.unwrap();

    assert_eq!(exit, ExitStatus::UsageError);
    for err in state.into_parts().1 {
        assert_eq!(text(&err), "Please specify a command to execute.\n");
    }
}

#[tokio::test]
async fn set_verbosity_only_where_policy_allows() {
    let fleet = fleet(&[("web-1", false), ("db-1", false)]);
    let mut state = OutputState::buffered(2);

    let exit = set_verbosity(&fleet, &mut state, 3, set_level).await.unwrap();

    assert_eq!(exit, ExitStatus::Failure);
    let (out, err) = state.into_parts();
    assert_eq!(text(&out[0]), "Target web-1 (0) previous logging level 1\n");
    assert!(
        text(&err[1]).starts_with("Setting logging verbosity for target db-1 (1) returned error: PermissionDenied")
    );
}

#[tokio::test(start_paused = true)]
async fn get_verbosity_deadline_fails_only_the_hung_target() {
    let fleet = fleet(&[("web-1", false), ("db-1", true)]);
    let mut state = OutputState::buffered(2);

    let started = tokio::time::Instant::now();
    let exit = get_verbosity(&fleet, &mut state, get_level).await.unwrap();

    assert_eq!(exit, ExitStatus::Failure);
    assert!(started.elapsed() >= Duration::from_secs(30));
    let (out, err) = state.into_parts();
    assert_eq!(text(&out[0]), "Target web-1 (0) current logging level 1\n");
    assert!(err[0].is_empty());
    assert!(out[1].is_empty());
    assert!(
        text(&err[1])
            .starts_with("Getting logging verbosity for target db-1 (1) returned error: DeadlineExceeded")
    );
}

#[tokio::test]
async fn get_proxy_verbosity_reports_on_first_writer() {
    let fleet = fleet(&[("web-1", false), ("db-1", false)]);
    let proxy = Host {
        level: Arc::new(AtomicI32::new(5)),
        hang: false,
    };
    let mut state = OutputState::buffered(2);

    let exit = get_proxy_verbosity(&fleet, proxy, &mut state, get_level)
        .await
        .unwrap();

    assert_eq!(exit, ExitStatus::Success);
    let (out, err) = state.into_parts();
    assert_eq!(text(&out[0]), "Proxy current logging level 5\n");
    assert!(out[1].is_empty());
    assert!(err.iter().all(Vec::is_empty));
}

#[tokio::test]
async fn set_proxy_verbosity_is_authorized() {
    let fleet = fleet(&[("web-1", false)]);
    let proxy = Host {
        level: Arc::new(AtomicI32::new(5)),
        hang: false,
    };
    let mut state = OutputState::buffered(1);

    let exit = set_proxy_verbosity(&fleet, proxy.clone(), &mut state, 9, set_level)
        .await
        .unwrap();

    assert_eq!(exit, ExitStatus::Failure);
    assert!(
        text(&state.into_parts().1[0])
            .starts_with("Could not set proxy logging: PermissionDenied")
    );
    assert_eq!(proxy.level.load(Ordering::SeqCst), 5);
}
