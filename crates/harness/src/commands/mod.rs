pub mod evaluate;
pub mod export;
pub mod inspect;
pub mod maintain;
pub mod rejudge;
pub mod run;

use tb_engine::CancelToken;

/// Wire Ctrl-C to cooperative cancellation: workers finish and commit the
/// trial they are on, the rest is left for resume.
pub fn cancel_on_ctrl_c() -> CancelToken {
    let cancel = CancelToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received; finishing in-flight trials, then stopping");
            token.cancel();
        }
    });
    cancel
}
