//! Routes controller statuses to the display and the outbound channel, and
//! turns inbound peer messages into controller calls.
//!
//! Outbound sends never happen inline: each status becomes a `send` job on
//! the [`JobQueue`], which serializes delivery and retries failed sends. The
//! event loop pumps the queue once per turn through [`MessagingGateway::queue_mut`].

use std::sync::Arc;
use std::time::Duration;

use grip_traits::{Connector, Enumerator};
use serde_json::Value;

use crate::config::SendPolicy;
use crate::controller::DeviceController;
use crate::error::{GatewayError, JobError};
use crate::job_queue::{JobId, JobOptions, JobQueue};
use crate::status::Status;

/// Job type used for outbound sends.
pub const SEND_JOB: &str = "send";

/// Visual surface showing the gauge. Rendering must not block.
pub trait Display {
    fn render(&mut self, status: &Status);
    fn set_visible(&mut self, visible: bool);
    fn set_gauge_visible(&mut self, visible: bool);
}

/// Delivery of one JSON message to the peer.
pub trait OutboundChannel: Send + Sync {
    fn send(&self, message: &Value) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum InboundCommand {
    MeasureStart { input_data: Value },
    MeasureSamplingOn,
    MeasureStop,
    AppHide,
    AppShow,
    ShowGauge,
    HideGauge,
}

impl InboundCommand {
    /// Decode a JSON message of the form `{"inputData": {"cmd": "..."}}`.
    pub fn parse(text: &str) -> Result<Self, GatewayError> {
        let v: Value =
            serde_json::from_str(text).map_err(|e| GatewayError::InvalidJson(e.to_string()))?;
        Self::from_value(&v)
    }

    pub fn from_value(v: &Value) -> Result<Self, GatewayError> {
        let input = v.get("inputData").ok_or(GatewayError::MissingCommand)?;
        let cmd = input
            .get("cmd")
            .and_then(Value::as_str)
            .ok_or(GatewayError::MissingCommand)?;
        Ok(match cmd {
            "measureStart" => Self::MeasureStart {
                input_data: input.clone(),
            },
            "measureSamplingOn" => Self::MeasureSamplingOn,
            "measureStop" => Self::MeasureStop,
            "appHide" => Self::AppHide,
            "appShow" => Self::AppShow,
            "showGauge" => Self::ShowGauge,
            "hideGauge" => Self::HideGauge,
            other => return Err(GatewayError::UnknownCommand(other.to_string())),
        })
    }
}

pub struct MessagingGateway<D: Display> {
    display: D,
    queue: JobQueue<Value>,
    policy: SendPolicy,
}

impl<D: Display> MessagingGateway<D> {
    /// Register the `send` handler on `queue`, delivering through `channel`.
    pub fn new(
        display: D,
        channel: Arc<dyn OutboundChannel>,
        mut queue: JobQueue<Value>,
        policy: SendPolicy,
    ) -> Result<Self, GatewayError> {
        queue.register_handler(SEND_JOB, move |message: &Value| {
            channel
                .send(message)
                .map_err(|e| JobError::Handler(e.to_string()))
        })?;
        Ok(Self {
            display,
            queue,
            policy,
        })
    }

    pub fn display(&self) -> &D {
        &self.display
    }

    pub fn queue(&self) -> &JobQueue<Value> {
        &self.queue
    }

    pub fn queue_mut(&mut self) -> &mut JobQueue<Value> {
        &mut self.queue
    }

    /// Deliver everything queued so far, up to `timeout`. Returns whether
    /// the queue went idle.
    pub fn drain(&mut self, timeout: Duration) -> bool {
        self.queue.wait_idle(timeout)
    }

    /// Show `status` on the display and queue it for the peer.
    pub fn publish(&mut self, status: &Status) -> Result<JobId, GatewayError> {
        match status {
            Status::AppShow => self.display.set_visible(true),
            Status::AppHide => self.display.set_visible(false),
            Status::ShowGauge => self.display.set_gauge_visible(true),
            Status::HideGauge => self.display.set_gauge_visible(false),
            _ => {}
        }
        self.display.render(status);
        let opts = JobOptions {
            max_attempts: self.policy.max_attempts,
            timeout: Some(self.policy.timeout),
            ..JobOptions::default()
        };
        let id = self.queue.enqueue(SEND_JOB, status.to_json(), opts)?;
        tracing::debug!(id, message = status.message(), "status queued");
        Ok(id)
    }

    /// Publish everything the controller has produced so far and hand the
    /// statuses back to the caller.
    pub fn flush<E: Enumerator, C: Connector>(
        &mut self,
        controller: &mut DeviceController<E, C>,
    ) -> Result<Vec<Status>, GatewayError> {
        let statuses = controller.drain_statuses();
        for status in &statuses {
            self.publish(status)?;
        }
        Ok(statuses)
    }

    /// Apply one inbound command and publish the resulting statuses.
    pub fn dispatch<E: Enumerator, C: Connector>(
        &mut self,
        command: InboundCommand,
        controller: &mut DeviceController<E, C>,
    ) -> Result<Vec<Status>, GatewayError> {
        tracing::info!(?command, "inbound command");
        match command {
            InboundCommand::MeasureStart { input_data } => controller.measure_start(input_data),
            InboundCommand::MeasureSamplingOn => controller.start_measure(),
            InboundCommand::MeasureStop => controller.measure_stop(),
            InboundCommand::AppHide => controller.app_hide(),
            InboundCommand::AppShow => self.publish(&Status::AppShow).map(drop)?,
            InboundCommand::ShowGauge => self.publish(&Status::ShowGauge).map(drop)?,
            InboundCommand::HideGauge => self.publish(&Status::HideGauge).map(drop)?,
        }
        self.flush(controller)
    }
}
