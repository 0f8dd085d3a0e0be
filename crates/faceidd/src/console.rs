//! Terminal front-end: one status line per session change. Any line on stdin
//! presses the Verify button, except `p`, which describes the preview frame.

use crate::session::{SessionController, SessionState, SessionStatus, Verifier};
use tokio::io::{AsyncBufReadExt, BufReader};

pub fn status_line(status: &SessionStatus) -> String {
    match (status.state, status.verdict) {
        (SessionState::Idle, _) => "Verification uninitialized".to_string(),
        (SessionState::Verifying, _) => "Verifying...".to_string(),
        (SessionState::Displaying, Some(verdict)) => match &status.result {
            Some(result) => format!(
                "{verdict} ({}/{} similar, ratio {:.2})",
                result.detections, result.gallery_size, result.ratio
            ),
            None => match &status.failure {
                Some(reason) => format!("{verdict} ({reason})"),
                None => verdict.to_string(),
            },
        },
        (SessionState::Displaying, None) => "Unverified!".to_string(),
    }
}

fn preview_line<V: Verifier>(session: &SessionController<V>) -> String {
    let status = session.status();
    let state = format!(
        "{} for {} ms",
        status_line(&status),
        status.since.elapsed().as_millis()
    );
    match session.latest_frame() {
        Some(frame) => format!(
            "[{state}] frame #{} {}x{}, {} ms old",
            frame.sequence,
            frame.width,
            frame.height,
            frame.timestamp.elapsed().as_millis()
        ),
        None => format!("[{state}] no frame captured yet"),
    }
}

/// Drive the session from stdin until it closes.
pub async fn run<V: Verifier>(session: &SessionController<V>) -> std::io::Result<()> {
    let mut status = session.subscribe();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    println!("{}", status_line(&status.borrow_and_update()));

    loop {
        tokio::select! {
            changed = status.changed() => {
                if changed.is_err() {
                    return Ok(());
                }
                println!("{}", status_line(&status.borrow_and_update()));
            }
            line = lines.next_line() => {
                match line? {
                    Some(cmd) if cmd.trim() == "p" => println!("{}", preview_line(session)),
                    Some(_) => {
                        if !session.trigger() {
                            println!("busy; try again when the verdict clears");
                        }
                    }
                    None => {
                        tracing::info!("stdin closed");
                        return Ok(());
                    }
                }
            }
        }
    }
}
