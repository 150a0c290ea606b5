//! JSON-lines bridge to an external simulation platform process.
//!
//! The bridge process is spawned once per campaign and answers one request per
//! line on its stdout:
//!
//! ```text
//! > {"id":1,"op":"search","params":{"scope":3,"path":"MTB\\MTB"}}
//! < {"id":1,"ok":true,"result":17}
//! < {"id":2,"ok":false,"error":"object not found"}
//! ```
//!
//! The first exchange is a `hello`; a bridge that does not answer it is treated
//! as an unreachable platform.

use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::process::{Child, Command, Stdio};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{ObjectHandle, Platform, ProjectFolder, Value};
use crate::error::{CampaignError, CampaignResult};

/// Protocol version announced in the handshake.
pub const PROTOCOL_VERSION: u32 = 1;

#[derive(Debug, Serialize)]
struct Request<'a> {
    id: u64,
    op: &'a str,
    params: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct Response {
    id: u64,
    ok: bool,
    #[serde(default)]
    result: serde_json::Value,
    #[serde(default)]
    error: Option<String>,
}

/// Platform backend talking to a bridge process over stdio.
pub struct BridgePlatform {
    reader: Box<dyn BufRead + Send>,
    writer: Box<dyn Write + Send>,
    child: Option<Child>,
    next_id: u64,
}

impl std::fmt::Debug for BridgePlatform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgePlatform")
            .field("pid", &self.child.as_ref().map(Child::id))
            .field("next_id", &self.next_id)
            .finish()
    }
}

impl BridgePlatform {
    /// Spawn the bridge program and perform the handshake.
    pub fn spawn(program: &Path, args: &[String]) -> CampaignResult<Self> {
        tracing::info!(program = %program.display(), ?args, "Launching platform bridge");

        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());

        if let Ok(rust_log) = std::env::var("RUST_LOG") {
            cmd.env("RUST_LOG", rust_log);
        }

        let mut child = cmd.spawn().map_err(|e| {
            CampaignError::PlatformUnreachable(format!("failed to spawn {}: {}", program.display(), e))
        })?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            let _ = child.kill();
            return Err(CampaignError::PlatformUnreachable(
                "bridge stdio not captured".to_string(),
            ));
        };

        let mut bridge = Self {
            reader: Box::new(BufReader::new(stdout)),
            writer: Box::new(stdin),
            child: Some(child),
            next_id: 0,
        };
        bridge.handshake()?;
        Ok(bridge)
    }

    /// Use existing streams instead of a child process.
    pub fn from_streams(
        reader: impl BufRead + Send + 'static,
        writer: impl Write + Send + 'static,
    ) -> CampaignResult<Self> {
        let mut bridge = Self {
            reader: Box::new(reader),
            writer: Box::new(writer),
            child: None,
            next_id: 0,
        };
        bridge.handshake()?;
        Ok(bridge)
    }

    fn handshake(&mut self) -> CampaignResult<()> {
        let reply: serde_json::Value = self
            .call("hello", json!({ "protocol": PROTOCOL_VERSION }))
            .map_err(|e| CampaignError::PlatformUnreachable(e.to_string()))?;
        tracing::info!(platform = %reply, "Platform bridge connected");
        Ok(())
    }

    fn call<T: DeserializeOwned>(&mut self, op: &str, params: serde_json::Value) -> CampaignResult<T> {
        let id = self.next_id;
        self.next_id += 1;

        let mut line = serde_json::to_string(&Request { id, op, params })?;
        line.push('\n');
        self.writer.write_all(line.as_bytes())?;
        self.writer.flush()?;

        let mut buf = String::new();
        if self.reader.read_line(&mut buf)? == 0 {
            return Err(CampaignError::Bridge(format!("bridge closed during '{}'", op)));
        }
        let response: Response = serde_json::from_str(buf.trim_end())?;

        if response.id != id {
            return Err(CampaignError::Bridge(format!(
                "response id {} does not match request id {}",
                response.id, id
            )));
        }
        if !response.ok {
            return Err(CampaignError::Bridge(format!(
                "{} failed: {}",
                op,
                response.error.unwrap_or_else(|| "unknown error".to_string())
            )));
        }
        Ok(serde_json::from_value(response.result)?)
    }
}

impl Drop for BridgePlatform {
    fn drop(&mut self) {
        if let Some(ref mut child) = self.child {
            let _ = self.writer.flush();
            tracing::debug!(pid = child.id(), "Stopping platform bridge");
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

impl Platform for BridgePlatform {
    fn active_project(&mut self) -> CampaignResult<Option<ObjectHandle>> {
        self.call("active_project", json!({}))
    }

    fn active_study_case(&mut self) -> CampaignResult<Option<ObjectHandle>> {
        self.call("active_study_case", json!({}))
    }

    fn project_folder(&mut self, folder: ProjectFolder) -> CampaignResult<Option<ObjectHandle>> {
        self.call("project_folder", json!({ "folder": folder.code() }))
    }

    fn search(&mut self, scope: ObjectHandle, path: &str) -> CampaignResult<Option<ObjectHandle>> {
        self.call("search", json!({ "scope": scope, "path": path }))
    }

    fn contents(
        &mut self,
        parent: ObjectHandle,
        class: &str,
        recursive: bool,
    ) -> CampaignResult<Vec<ObjectHandle>> {
        self.call(
            "contents",
            json!({ "parent": parent, "class": class, "recursive": recursive }),
        )
    }

    fn parent(&mut self, object: ObjectHandle) -> CampaignResult<Option<ObjectHandle>> {
        self.call("parent", json!({ "object": object }))
    }

    fn full_name(&mut self, object: ObjectHandle) -> CampaignResult<String> {
        self.call("full_name", json!({ "object": object }))
    }

    fn is_calc_relevant(&mut self, object: ObjectHandle) -> CampaignResult<bool> {
        self.call("is_calc_relevant", json!({ "object": object }))
    }

    fn create(&mut self, parent: ObjectHandle, class: &str, name: &str) -> CampaignResult<ObjectHandle> {
        self.call(
            "create",
            json!({ "parent": parent, "class": class, "name": name }),
        )
    }

    fn copy_into(&mut self, parent: ObjectHandle, source: ObjectHandle) -> CampaignResult<ObjectHandle> {
        self.call("copy_into", json!({ "parent": parent, "source": source }))
    }

    fn delete(&mut self, object: ObjectHandle) -> CampaignResult<()> {
        self.call::<serde_json::Value>("delete", json!({ "object": object }))
            .map(drop)
    }

    fn activate(&mut self, object: ObjectHandle) -> CampaignResult<()> {
        self.call::<serde_json::Value>("activate", json!({ "object": object }))
            .map(drop)
    }

    fn deactivate(&mut self, object: ObjectHandle) -> CampaignResult<()> {
        self.call::<serde_json::Value>("deactivate", json!({ "object": object }))
            .map(drop)
    }

    fn get_attribute(&mut self, object: ObjectHandle, name: &str) -> CampaignResult<Value> {
        self.call("get_attribute", json!({ "object": object, "name": name }))
    }

    fn set_attribute(&mut self, object: ObjectHandle, name: &str, value: Value) -> CampaignResult<()> {
        self.call::<serde_json::Value>(
            "set_attribute",
            json!({ "object": object, "name": name, "value": value }),
        )
        .map(drop)
    }

    fn execute(&mut self, object: ObjectHandle, method: &str, args: &[Value]) -> CampaignResult<Value> {
        self.call(
            "execute",
            json!({ "object": object, "method": method, "args": args }),
        )
    }

    fn from_study_case(&mut self, class: &str) -> CampaignResult<Option<ObjectHandle>> {
        self.call("from_study_case", json!({ "class": class }))
    }

    fn create_version(&mut self, project: ObjectHandle, name: &str) -> CampaignResult<()> {
        self.call::<serde_json::Value>(
            "create_version",
            json!({ "project": project, "name": name }),
        )
        .map(drop)
    }

    fn write_changes(&mut self) -> CampaignResult<()> {
        self.call::<serde_json::Value>("write_changes", json!({}))
            .map(drop)
    }

    fn set_echo(&mut self, on: bool) -> CampaignResult<()> {
        self.call::<serde_json::Value>("set_echo", json!({ "on": on }))
            .map(drop)
    }
}
