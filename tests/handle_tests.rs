use fxrunner::error::{Error, Result};
use fxrunner::server::{
    ChildProcessHandle, ChildProcessState, CommandWriter, LifecycleSignal, ProcessControl,
    ProcessParts, SessionMeta,
};
use mockall::mock;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

mock! {
    pub Control {}

    impl ProcessControl for Control {
        fn terminate(&mut self) -> io::Result<()>;
    }
}

// In-memory stdin that keeps everything written to it.
#[derive(Clone, Default)]
struct SharedStdin(Arc<Mutex<Vec<u8>>>);

impl futures_lite::AsyncWrite for SharedStdin {
    fn poll_write(self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

type StatusLog = Arc<Mutex<Vec<ChildProcessState>>>;

fn terminate_once() -> MockControl {
    let mut control = MockControl::new();
    control.expect_terminate().times(1).returning(|| Ok(()));
    control
}

fn meta(statuses: &StatusLog) -> SessionMeta {
    let statuses = statuses.clone();
    SessionMeta {
        mutex: "5f1c2e".to_string(),
        net_endpoint: "0.0.0.0:30120".to_string(),
        on_status_update: Arc::new(move |status| statuses.lock().unwrap().push(status)),
        instant_crash_threshold: Duration::from_millis(1),
    }
}

fn create_handle(control: MockControl, stdin: &SharedStdin, statuses: &StatusLog) -> Result<ChildProcessHandle> {
    ChildProcessHandle::new(
        ProcessParts {
            pid: Some(4242),
            stdin: Some(Box::new(stdin.clone()) as CommandWriter),
            control: Box::new(control),
        },
        meta(statuses),
    )
}

#[tokio::test]
async fn test_status_follows_exit_then_close() -> Result<()> {
    let statuses = StatusLog::default();
    let handle = create_handle(terminate_once(), &SharedStdin::default(), &statuses)?;
    let exit_code = Arc::new(Mutex::new(None));
    let seen = exit_code.clone();
    handle.on_exit(move |code| *seen.lock().unwrap() = Some(code));

    assert_eq!(handle.status(), ChildProcessState::Alive);
    assert!(handle.is_alive());

    handle.handle_signal(LifecycleSignal::Exit { code: Some(1) });
    assert_eq!(handle.status(), ChildProcessState::Exited);
    assert!(!handle.is_alive());
    assert_eq!(*exit_code.lock().unwrap(), Some(Some(1)));

    handle.handle_signal(LifecycleSignal::Close);
    let info = handle.state_info();
    assert_eq!(info.state, ChildProcessState::Destroyed);
    assert!(info.ts_exit.is_some());
    assert!(info.ts_close.is_some());
    assert!(info.ts_kill.is_some());

    assert_eq!(
        *statuses.lock().unwrap(),
        vec![ChildProcessState::Exited, ChildProcessState::Destroyed]
    );
    Ok(())
}

#[tokio::test]
async fn test_destroy_is_idempotent() -> Result<()> {
    let statuses = StatusLog::default();
    let handle = create_handle(terminate_once(), &SharedStdin::default(), &statuses)?;

    handle.destroy();
    let first_kill = handle.state_info().ts_kill;
    assert!(first_kill.is_some());

    tokio::time::sleep(Duration::from_millis(5)).await;
    handle.destroy();

    assert_eq!(handle.state_info().ts_kill, first_kill);
    assert_eq!(handle.status(), ChildProcessState::Destroyed);
    assert_eq!(statuses.lock().unwrap().len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_destroy_swallows_termination_errors() -> Result<()> {
    let mut control = MockControl::new();
    control
        .expect_terminate()
        .times(1)
        .returning(|| Err(io::Error::new(io::ErrorKind::BrokenPipe, "already reaped")));
    let handle = create_handle(control, &SharedStdin::default(), &StatusLog::default())?;

    handle.destroy();
    assert_eq!(handle.status(), ChildProcessState::Destroyed);
    Ok(())
}

#[tokio::test]
async fn test_close_before_exit_applies_exit_first() -> Result<()> {
    let statuses = StatusLog::default();
    let handle = create_handle(terminate_once(), &SharedStdin::default(), &statuses)?;
    let exit_called = Arc::new(Mutex::new(false));
    let flag = exit_called.clone();
    handle.on_exit(move |code| {
        assert_eq!(code, None);
        *flag.lock().unwrap() = true;
    });

    handle.handle_signal(LifecycleSignal::Close);

    let info = handle.state_info();
    assert!(*exit_called.lock().unwrap());
    assert!(info.ts_exit.is_some());
    assert!(info.ts_close.is_some());
    assert!(info.ts_exit <= info.ts_close);
    assert_eq!(info.state, ChildProcessState::Destroyed);
    Ok(())
}

#[tokio::test]
async fn test_uptime_freezes_at_exit() -> Result<()> {
    let handle = create_handle(terminate_once(), &SharedStdin::default(), &StatusLog::default())?;

    handle.handle_signal(LifecycleSignal::Exit { code: Some(0) });
    let first = handle.state_info().uptime;
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(handle.state_info().uptime, first);

    handle.destroy();
    assert_eq!(handle.state_info().uptime, first);
    Ok(())
}

#[tokio::test]
async fn test_write_line_appends_newline() -> Result<()> {
    let stdin = SharedStdin::default();
    let handle = create_handle(terminate_once(), &stdin, &StatusLog::default())?;

    handle.write_line(r#"say "hello""#).await?;
    handle.write_line("status").await?;
    assert_eq!(stdin.0.lock().unwrap().as_slice(), b"say \"hello\"\nstatus\n");

    handle.destroy();
    let result = handle.write_line("status").await;
    assert!(matches!(result, Err(Error::Communication(_))));
    Ok(())
}

#[tokio::test]
async fn test_new_rejects_incomplete_processes() {
    let statuses = StatusLog::default();

    let missing_pid = ChildProcessHandle::new(
        ProcessParts {
            pid: None,
            stdin: Some(Box::new(SharedStdin::default()) as CommandWriter),
            control: Box::new(MockControl::new()),
        },
        meta(&statuses),
    );
    assert!(matches!(missing_pid, Err(Error::Process(_))));

    let missing_stdin = ChildProcessHandle::new(
        ProcessParts {
            pid: Some(1),
            stdin: None,
            control: Box::new(MockControl::new()),
        },
        meta(&statuses),
    );
    assert!(matches!(missing_stdin, Err(Error::Process(_))));

    let mut no_mutex = meta(&statuses);
    no_mutex.mutex.clear();
    let missing_mutex = ChildProcessHandle::new(
        ProcessParts {
            pid: Some(1),
            stdin: Some(Box::new(SharedStdin::default()) as CommandWriter),
            control: Box::new(MockControl::new()),
        },
        no_mutex,
    );
    assert!(matches!(missing_mutex, Err(Error::Process(_))));
}
