// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Per-connection worker state machine.

use rayfarm_proto::{
    AckToken, ColumnRange, ColumnsPayload, ErrorCode, ErrorPayload, InitPayload, LivenessToken,
    Message, SceneDescriptor, SceneDigest, SCHEMA_VERSION,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::shader::Shader;

/// A validated scene retained for the rest of a connection.
#[derive(Debug, Clone)]
pub struct BoundScene {
    scene: SceneDescriptor,
    digest: SceneDigest,
}

impl BoundScene {
    /// Check an `init` body and retain its scene.
    pub fn bind(init: InitPayload) -> Result<Self, ErrorPayload> {
        if init.schema != SCHEMA_VERSION {
            return Err(ErrorPayload::new(
                ErrorCode::SchemaMismatch,
                format!(
                    "scene schema {} not supported (worker speaks {SCHEMA_VERSION})",
                    init.schema
                ),
            ));
        }
        init.scene
            .validate()
            .map_err(|err| ErrorPayload::new(ErrorCode::InvalidScene, err.to_string()))?;
        let digest = SceneDigest::of(&init.scene)
            .map_err(|err| ErrorPayload::new(ErrorCode::Internal, err.to_string()))?;
        Ok(Self {
            scene: init.scene,
            digest,
        })
    }

    /// The retained scene.
    pub fn scene(&self) -> &SceneDescriptor {
        &self.scene
    }

    /// Acknowledgement returned to the coordinator.
    pub fn ack(&self) -> AckToken {
        AckToken {
            scene_digest: self.digest,
            width: self.scene.width(),
            height: self.scene.height(),
        }
    }

    /// Shade every cell of `range`, column-major.
    ///
    /// Output index `i` is column `range.from + i / H`, row `i % H`.
    pub fn compute_columns<S>(
        &self,
        shader: &S,
        range: ColumnRange,
    ) -> Result<ColumnsPayload, ErrorPayload>
    where
        S: Shader + ?Sized,
    {
        let width = self.scene.width();
        let height = self.scene.height();
        if !range.within(width) {
            return Err(ErrorPayload::new(
                ErrorCode::RangeOutOfBounds,
                format!("range {range} outside image width {width}"),
            ));
        }
        let mut colors = Vec::with_capacity(range.cells(height));
        for column in range.columns() {
            for row in 0..height {
                colors.push(shader.shade(&self.scene, column, row));
            }
        }
        Ok(ColumnsPayload {
            range,
            height,
            colors,
        })
    }
}

enum WorkerState {
    Live,
    Ready(BoundScene),
}

/// Protocol state for one coordinator connection.
///
/// Starts `Live`: `ping` is answered, `compute_columns` is refused with
/// `E_NOT_INITIALIZED`. A successful `init` moves to `Ready`; a later `init`
/// replaces the bound scene. A rejected `init` leaves the state untouched.
pub struct WorkerSession<S> {
    shader: Arc<S>,
    state: WorkerState,
}

impl<S: Shader> WorkerSession<S> {
    /// Fresh session in the `Live` state.
    pub fn new(shader: Arc<S>) -> Self {
        Self {
            shader,
            state: WorkerState::Live,
        }
    }

    /// `true` once a scene is bound.
    pub fn is_ready(&self) -> bool {
        matches!(self.state, WorkerState::Ready(_))
    }

    /// Currently bound scene, if any.
    pub fn bound(&self) -> Option<&BoundScene> {
        match &self.state {
            WorkerState::Ready(bound) => Some(bound),
            WorkerState::Live => None,
        }
    }

    /// Answer one request. Every request gets exactly one reply.
    pub fn handle(&mut self, request: Message) -> Message {
        match request {
            Message::Ping => Message::Pong(LivenessToken::current()),
            Message::Init(init) => match BoundScene::bind(init) {
                Ok(bound) => {
                    if bound.scene().lights.is_empty() {
                        warn!("scene has no lights; every pixel will be unlit");
                    }
                    let ack = bound.ack();
                    info!(
                        digest = %ack.scene_digest,
                        width = ack.width,
                        height = ack.height,
                        replaced = self.is_ready(),
                        "scene bound"
                    );
                    self.state = WorkerState::Ready(bound);
                    Message::InitAck(ack)
                }
                Err(err) => {
                    warn!(code = %err.name, message = %err.message, "init rejected");
                    Message::Error(err)
                }
            },
            Message::ComputeColumns(range) => {
                let reply = match &self.state {
                    WorkerState::Live => Err(ErrorPayload::new(
                        ErrorCode::NotInitialized,
                        "compute_columns before init",
                    )),
                    WorkerState::Ready(bound) => bound.compute_columns(self.shader.as_ref(), range),
                };
                match reply {
                    Ok(columns) => {
                        debug!(%range, cells = columns.colors.len(), "columns computed");
                        Message::Columns(columns)
                    }
                    Err(err) => {
                        debug!(%range, code = %err.name, "compute refused");
                        Message::Error(err)
                    }
                }
            }
            other => Message::Error(ErrorPayload::new(
                ErrorCode::BadRequest,
                format!("worker does not serve `{}`", other.op_name()),
            )),
        }
    }
}
