//! In-memory build environment and layer registry used by unit tests

use crate::core::error::PipelineError;
use crate::core::traits::{
    BuildEnvironment, EnvironmentHandle, ExecOutput, GrantPermissionRequest, GrantResponse,
    GrantStatus, LayerRegistry, PublishVersionRequest, RemoteResponse,
};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

// ============================================================================
// Build environment
// ============================================================================

#[derive(Default)]
pub struct FakeEnvironment {
    failing_install: Option<String>,
    failing_export: bool,
    empty_export: bool,
    instances: Mutex<Vec<String>>,
    images: Mutex<Vec<String>>,
    teardowns: Mutex<Vec<String>>,
    commands: Mutex<Vec<Vec<String>>>,
}

impl FakeEnvironment {
    pub fn new() -> Self {
        Self::default()
    }

    /// `pip install` exits non-zero for images of this runtime version
    pub fn failing_install(mut self, runtime_version: &str) -> Self {
        self.failing_install = Some(runtime_version.to_string());
        self
    }

    pub fn failing_export(mut self) -> Self {
        self.failing_export = true;
        self
    }

    pub fn empty_export(mut self) -> Self {
        self.empty_export = true;
        self
    }

    pub fn instances(&self) -> Vec<String> {
        self.instances.lock().unwrap().clone()
    }

    pub fn images(&self) -> Vec<String> {
        self.images.lock().unwrap().clone()
    }

    pub fn teardowns(&self) -> Vec<String> {
        self.teardowns.lock().unwrap().clone()
    }

    pub fn commands(&self) -> Vec<Vec<String>> {
        self.commands.lock().unwrap().clone()
    }
}

fn image_version(image: &str) -> &str {
    image.rsplit(':').next().unwrap_or(image)
}

fn tar_stream(files: &[(String, &[u8])]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for (path, data) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_mtime(0);
        header.set_cksum();
        builder.append_data(&mut header, path, *data).unwrap();
    }
    builder.into_inner().unwrap()
}

#[async_trait]
impl BuildEnvironment for FakeEnvironment {
    fn name(&self) -> &str {
        "fake"
    }

    async fn instantiate(&self, handle: &EnvironmentHandle) -> anyhow::Result<()> {
        self.instances.lock().unwrap().push(handle.id.clone());
        self.images.lock().unwrap().push(handle.image.clone());
        Ok(())
    }

    async fn execute(
        &self,
        handle: &EnvironmentHandle,
        _workdir: &str,
        argv: &[String],
    ) -> anyhow::Result<ExecOutput> {
        self.commands.lock().unwrap().push(argv.to_vec());

        let version = image_version(&handle.image);
        if argv[0] == "pip" && self.failing_install.as_deref() == Some(version) {
            return Ok(ExecOutput {
                exit_code: 1,
                stdout: Vec::new(),
                stderr: b"ERROR: Could not find a version that satisfies the requirement".to_vec(),
            });
        }

        Ok(ExecOutput::default())
    }

    async fn export_tree(
        &self,
        handle: &EnvironmentHandle,
        _workdir: &str,
        dir: &str,
    ) -> anyhow::Result<Vec<u8>> {
        if self.failing_export {
            anyhow::bail!("tar: {}: Cannot stat: No such file or directory", dir);
        }
        if self.empty_export {
            return Ok(tar_stream(&[]));
        }

        let version = image_version(&handle.image);
        let site = format!("{}/lib/python{}/site-packages", dir, version);
        Ok(tar_stream(&[
            (format!("{}/datadog/__init__.py", site), b"__version__ = '0.0.0'\n".as_slice()),
            (format!("{}/datadog/api.py", site), b"def send():\n    pass\n".as_slice()),
        ]))
    }

    async fn teardown(&self, handle: &EnvironmentHandle) -> anyhow::Result<()> {
        self.teardowns.lock().unwrap().push(handle.id.clone());
        Ok(())
    }
}

// ============================================================================
// Layer registry
// ============================================================================

/// Scripted behavior of one publish call
#[derive(Clone)]
pub enum PublishScript {
    /// Fail with this error, `times` times, then behave normally
    Fail { error: PipelineError, times: u32 },
    /// Respond successfully with this raw body
    Respond(String),
    /// Never answer
    Hang,
}

/// Scripted behavior of one grant call
#[derive(Clone)]
pub enum GrantScript {
    /// Fail with this error, `times` times, then behave normally
    Fail { error: PipelineError, times: u32 },
    /// Hang on the first `times` calls, then behave normally
    Hang { times: u32 },
}

/// What a scripted call decided while the state lock was held
enum Scripted<T> {
    Hang,
    Done(Result<T, PipelineError>),
    Default,
}

/// Longer than any timeout used in tests
const HANG: Duration = Duration::from_secs(3600);

#[derive(Default)]
struct RegistryState {
    versions: HashMap<(String, String), u64>,
    publish_calls: Vec<(String, String)>,
    grant_calls: Vec<GrantPermissionRequest>,
    statements: HashSet<(String, String, String, String)>,
    publish_scripts: HashMap<(String, String), PublishScript>,
    grant_scripts: HashMap<(String, String), GrantScript>,
}

#[derive(Default)]
pub struct FakeRegistry {
    state: Mutex<RegistryState>,
}

impl FakeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script_publish(&self, region: &str, layer: &str, script: PublishScript) {
        self.state
            .lock()
            .unwrap()
            .publish_scripts
            .insert((region.to_string(), layer.to_string()), script);
    }

    /// Every grant for this pair fails with `error`
    pub fn fail_grant(&self, region: &str, layer: &str, error: PipelineError) {
        self.script_grant(
            region,
            layer,
            GrantScript::Fail {
                error,
                times: u32::MAX,
            },
        );
    }

    pub fn script_grant(&self, region: &str, layer: &str, script: GrantScript) {
        self.state
            .lock()
            .unwrap()
            .grant_scripts
            .insert((region.to_string(), layer.to_string()), script);
    }

    pub fn publish_calls(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().publish_calls.clone()
    }

    pub fn grant_calls(&self) -> Vec<GrantPermissionRequest> {
        self.state.lock().unwrap().grant_calls.clone()
    }

    /// Distinct effective grants
    pub fn statement_count(&self) -> usize {
        self.state.lock().unwrap().statements.len()
    }
}

#[async_trait]
impl LayerRegistry for FakeRegistry {
    fn name(&self) -> &str {
        "fake"
    }

    async fn publish_version(
        &self,
        request: &PublishVersionRequest,
    ) -> Result<RemoteResponse, PipelineError> {
        let scripted = {
            let mut state = self.state.lock().unwrap();
            let key = (request.region.clone(), request.layer_name.clone());
            state.publish_calls.push(key.clone());

            let scripted = match state.publish_scripts.get_mut(&key) {
                Some(PublishScript::Fail { error, times }) if *times > 0 => {
                    *times -= 1;
                    Scripted::Done(Err(error.clone()))
                }
                Some(PublishScript::Respond(raw)) => {
                    Scripted::Done(Ok(RemoteResponse { raw: raw.clone() }))
                }
                Some(PublishScript::Hang) => Scripted::Hang,
                _ => Scripted::Default,
            };

            match scripted {
                Scripted::Default => {
                    let version = state.versions.entry(key).or_insert(0);
                    *version += 1;
                    Scripted::Done(Ok(RemoteResponse {
                        raw: format!(
                            r#"{{"LayerArn": "arn:aws:lambda:{}:000000000000:layer:{}", "Version": {}}}"#,
                            request.region, request.layer_name, version
                        ),
                    }))
                }
                other => other,
            }
        };

        match scripted {
            Scripted::Done(result) => result,
            Scripted::Hang | Scripted::Default => {
                tokio::time::sleep(HANG).await;
                Err(PipelineError::RemoteCallFailure {
                    region: request.region.clone(),
                    operation: "publish-layer-version".to_string(),
                    message: "hung call was never cancelled".to_string(),
                    raw_response: String::new(),
                    ambiguous: true,
                })
            }
        }
    }

    async fn grant_permission(
        &self,
        request: &GrantPermissionRequest,
    ) -> Result<GrantResponse, PipelineError> {
        let scripted = {
            let mut state = self.state.lock().unwrap();
            state.grant_calls.push(request.clone());

            let key = (request.region.clone(), request.layer_name.clone());
            let scripted = match state.grant_scripts.get_mut(&key) {
                Some(GrantScript::Fail { error, times }) if *times > 0 => {
                    *times -= 1;
                    Scripted::Done(Err(error.clone()))
                }
                Some(GrantScript::Hang { times }) if *times > 0 => {
                    *times -= 1;
                    Scripted::Hang
                }
                _ => Scripted::Default,
            };

            match scripted {
                Scripted::Default => {
                    let inserted = state.statements.insert((
                        request.region.clone(),
                        request.layer_name.clone(),
                        request.version.clone(),
                        request.statement_id.clone(),
                    ));

                    Scripted::Done(Ok(GrantResponse {
                        status: if inserted {
                            GrantStatus::Granted
                        } else {
                            GrantStatus::AlreadyGranted
                        },
                        raw: format!(r#"{{"RevisionId": "rev-{}"}}"#, request.version),
                    }))
                }
                other => other,
            }
        };

        match scripted {
            Scripted::Done(result) => result,
            Scripted::Hang | Scripted::Default => {
                tokio::time::sleep(HANG).await;
                Err(PipelineError::RemoteCallFailure {
                    region: request.region.clone(),
                    operation: "add-layer-version-permission".to_string(),
                    message: "hung call was never cancelled".to_string(),
                    raw_response: String::new(),
                    ambiguous: false,
                })
            }
        }
    }
}
