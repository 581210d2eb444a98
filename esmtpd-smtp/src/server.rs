use esmtpd_tracing::traced;
use serde::{Deserialize, Serialize};

use esmtpd_common::Signal;

use crate::{listener::Listener, Smtp};

#[derive(Default, Deserialize, Serialize)]
pub struct Server {
    #[serde(alias = "listener")]
    listeners: Vec<Listener<Smtp>>,
}

impl Server {
    /// Build a server from a fully-configured set of listeners, as the
    /// `esmtpd` binary does once it has wired the spool, auth backend and
    /// policy hooks into each listener's arguments.
    #[must_use]
    pub fn new(listeners: Vec<Listener<Smtp>>) -> Self {
        Self { listeners }
    }

    #[traced(instrument(level = tracing::Level::TRACE, skip_all), timing(precision = "us"))]
    pub async fn serve(
        &self,
        shutdown: tokio::sync::broadcast::Receiver<Signal>,
    ) -> anyhow::Result<()> {
        futures_util::future::join_all(
            self.listeners
                .iter()
                .map(|l| l.serve(shutdown.resubscribe())),
        )
        .await;

        Ok(())
    }
}
