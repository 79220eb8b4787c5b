//! Session commands: presign and completion waits.

use std::sync::Arc;

use anyhow::{Context, Result};
use ceremony::{EventCorrelator, RoundChainer, SessionRegistry};
use common::{
    CeremonyMetrics, ClientSettings, CompletionEvent, CompletionKind, EventId, ObjectId,
    RoundKind, SessionHandle, SessionId,
};
use serde::Serialize;
use tracing::info;

use super::{session_config, signing_key};

/// Start a presign for `dwallet_id` and wait for its output.
pub async fn presign(settings: &ClientSettings, dwallet_id: &str) -> Result<()> {
    let dwallet_id: ObjectId = dwallet_id.parse().context("Invalid dWallet id")?;
    let config = session_config(settings, signing_key(settings, true)?).await?;
    let chainer = RoundChainer::new(config, SessionRegistry::shared()).with_cleanup();

    info!(dwallet_id = %dwallet_id, "Requesting presign");
    let output = chainer.run_presign(dwallet_id).await?;

    println!("Presign Completed");
    println!("=================");
    print_json(&output)?;
    Ok(())
}

/// Wait for the completion event of a session started elsewhere.
pub async fn await_session(
    settings: &ClientSettings,
    session_id: &str,
    kind: CompletionKind,
    start_tx: Option<String>,
) -> Result<()> {
    let config = session_config(settings, signing_key(settings, false)?).await?;
    let correlator = EventCorrelator::new(config, Arc::new(CeremonyMetrics::new()));

    let mut handle = SessionHandle::new(
        SessionId::new(session_id),
        round_for(kind),
        start_tx.clone().unwrap_or_default(),
    );
    if let Some(digest) = start_tx {
        // The start-session event is always the transaction's first.
        handle = handle.with_start_event(EventId::new(digest, 0));
    }

    info!(session_id = %handle.session_id, event = %kind, "Awaiting session");
    let event = correlator.await_completion(&handle, kind).await?;

    println!("{} received", kind);
    println!("{}", "=".repeat(kind.event_name().len() + 9));
    match event {
        CompletionEvent::DkgFirstRound(o) => print_json(&o)?,
        CompletionEvent::DkgSecondRound(o) => print_json(&o)?,
        CompletionEvent::Presign(o) => print_json(&o)?,
        CompletionEvent::Sign(o) => print_json(&o)?,
        CompletionEvent::PartialSignatures(o) => print_json(&o)?,
    }
    Ok(())
}

fn round_for(kind: CompletionKind) -> RoundKind {
    match kind {
        CompletionKind::DkgFirstRound => RoundKind::DkgFirstRound,
        CompletionKind::DkgSecondRound => RoundKind::DkgSecondRound,
        CompletionKind::Presign => RoundKind::Presign,
        CompletionKind::Sign => RoundKind::Sign,
        CompletionKind::PartialSignatures => RoundKind::FutureSign,
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
