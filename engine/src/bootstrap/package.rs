//! Runtime package manifests and phase command resolution

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use shipyard_models::bootstrap::{HostRole, Phase};
use shipyard_models::RuntimeType;

use crate::errors::EngineError;
use crate::filesys::dir::Dir;
use crate::storage::layout::PackageLayout;

/// Check run on a host when a package declares no preflight action
pub const BUILTIN_PREFLIGHT: &str =
    "uname -a && id -u && command -v sh >/dev/null && df -P / >/dev/null";

/// `manifest.json` of a runtime package
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageManifest {
    #[serde(default)]
    pub runtime: Option<String>,

    #[serde(default)]
    pub version: Option<String>,

    /// Artifact relative to the package directory
    #[serde(default)]
    pub package_file: Option<String>,

    /// Expected SHA-256 of `package_file`, hex
    #[serde(default)]
    pub sha256: Option<String>,

    #[serde(default)]
    pub preflight_script: Option<String>,
    #[serde(default)]
    pub preflight_command: Option<String>,

    #[serde(default)]
    pub install_script: Option<String>,
    #[serde(default)]
    pub install_command: Option<String>,

    #[serde(default)]
    pub verify_script: Option<String>,
    #[serde(default)]
    pub verify_command: Option<String>,

    #[serde(default)]
    pub uninstall_script: Option<String>,
    #[serde(default)]
    pub uninstall_command: Option<String>,
}

fn declared(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

impl PackageManifest {
    /// Script and fallback command declared for a phase
    ///
    /// The rollback phase runs the uninstall action.
    pub fn action_for(&self, phase: Phase) -> (Option<&str>, Option<&str>) {
        let (script, command) = match phase {
            Phase::Preflight => (&self.preflight_script, &self.preflight_command),
            Phase::Install => (&self.install_script, &self.install_command),
            Phase::Verify => (&self.verify_script, &self.verify_command),
            Phase::Rollback => (&self.uninstall_script, &self.uninstall_command),
        };
        (declared(script), declared(command))
    }

    pub fn has_action(&self, phase: Phase) -> bool {
        let (script, command) = self.action_for(phase);
        script.is_some() || command.is_some()
    }
}

/// A package whose manifest and artifact checked out
#[derive(Debug, Clone)]
pub struct ResolvedPackage {
    pub runtime: RuntimeType,
    pub version: String,
    pub dir: Dir,
    pub manifest_path: PathBuf,
    pub manifest: PackageManifest,

    /// Verified digest of the artifact, when one is declared
    pub sha256: Option<String>,
}

/// Load and verify the package for `(runtime, version)`
///
/// Nothing runs remotely before this succeeds: a missing install action, an
/// unreadable artifact or a digest mismatch all fail here.
pub async fn resolve_package(
    layout: &PackageLayout,
    runtime: RuntimeType,
    version: &str,
) -> Result<ResolvedPackage, EngineError> {
    let dir = layout.package_dir(runtime, version)?;
    let manifest_file = layout.manifest_file(runtime, version)?;
    if !manifest_file.exists().await {
        return Err(EngineError::NotFound(format!(
            "package manifest {}",
            manifest_file.path().display()
        )));
    }

    let manifest: PackageManifest = manifest_file.read_json().await.map_err(|e| {
        EngineError::IntegrityError(format!(
            "corrupt package manifest {}: {}",
            manifest_file.path().display(),
            e
        ))
    })?;

    if let Some(declared_runtime) = declared(&manifest.runtime) {
        if !declared_runtime.eq_ignore_ascii_case(runtime.as_str()) {
            return Err(EngineError::IntegrityError(format!(
                "manifest declares runtime {} but {} was requested",
                declared_runtime, runtime
            )));
        }
    }
    if let Some(declared_version) = declared(&manifest.version) {
        if declared_version != version.trim() {
            return Err(EngineError::IntegrityError(format!(
                "manifest declares version {} but {} was requested",
                declared_version, version
            )));
        }
    }
    if !manifest.has_action(Phase::Install) {
        return Err(EngineError::IntegrityError(format!(
            "package {} {} declares no install action",
            runtime, version
        )));
    }

    let sha256 = match (declared(&manifest.package_file), declared(&manifest.sha256)) {
        (Some(package_file), Some(expected)) => {
            let artifact = layout.package_file(&dir, package_file)?;
            let actual = artifact.sha256().await.map_err(|e| {
                EngineError::IntegrityError(format!(
                    "package file {} unreadable: {}",
                    artifact.path().display(),
                    e
                ))
            })?;
            if !actual.eq_ignore_ascii_case(expected) {
                return Err(EngineError::IntegrityError(format!(
                    "checksum mismatch for {}: expected {}, got {}",
                    package_file, expected, actual
                )));
            }
            debug!("Verified {} ({})", artifact.path().display(), actual);
            Some(actual)
        }
        (None, Some(_)) => {
            return Err(EngineError::IntegrityError(
                "manifest declares a checksum without a package file".to_string(),
            ));
        }
        (Some(package_file), None) => {
            warn!("Package file {} has no declared checksum", package_file);
            None
        }
        (None, None) => None,
    };

    Ok(ResolvedPackage {
        runtime,
        version: version.trim().to_string(),
        dir,
        manifest_path: manifest_file.path().to_path_buf(),
        manifest,
        sha256,
    })
}

/// What a phase runs on each host
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhaseAction {
    /// Script shipped from the package directory
    Script { path: PathBuf, body: String },

    /// Fallback command from the manifest
    Command(String),

    /// Built-in check, preflight only
    BuiltinDefault(&'static str),
}

/// Script, then command, then the built-in preflight check
///
/// `Ok(None)` when the phase has nothing to run. A declared script that is
/// missing from disk falls through to the command.
pub async fn resolve_phase_action(
    layout: &PackageLayout,
    package: &ResolvedPackage,
    phase: Phase,
) -> Result<Option<PhaseAction>, EngineError> {
    let (script, command) = package.manifest.action_for(phase);

    if let Some(script) = script {
        let file = layout.package_file(&package.dir, script)?;
        if file.exists().await {
            let body = file.read_string().await?;
            return Ok(Some(PhaseAction::Script {
                path: file.path().to_path_buf(),
                body,
            }));
        }
        warn!(
            "{} script {} not found in {}",
            phase,
            script,
            package.dir.path().display()
        );
    }

    if let Some(command) = command {
        return Ok(Some(PhaseAction::Command(command.to_string())));
    }

    if phase == Phase::Preflight {
        return Ok(Some(PhaseAction::BuiltinDefault(BUILTIN_PREFLIGHT)));
    }
    Ok(None)
}

/// Variables exported to every phase command
#[derive(Debug, Clone)]
pub struct PhaseEnv<'a> {
    pub runtime: RuntimeType,
    pub version: &'a str,
    pub phase: Phase,
    pub role: HostRole,
    pub control_address: Option<&'a str>,
    pub package_sha256: Option<&'a str>,
}

impl PhaseEnv<'_> {
    fn assignments(&self) -> String {
        [
            ("SHIPYARD_RUNTIME", self.runtime.as_str()),
            ("SHIPYARD_VERSION", self.version),
            ("SHIPYARD_PHASE", self.phase.as_str()),
            ("SHIPYARD_ROLE", self.role.as_str()),
            ("SHIPYARD_CONTROL_ADDRESS", self.control_address.unwrap_or("")),
            ("SHIPYARD_PACKAGE_SHA256", self.package_sha256.unwrap_or("")),
        ]
        .iter()
        .map(|(name, value)| format!("{}={}", name, shell_quote(value)))
        .collect::<Vec<_>>()
        .join(" ")
    }
}

/// Single-quote a value for POSIX sh
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Shell command line for one host
pub fn render_command(action: &PhaseAction, env: &PhaseEnv<'_>) -> String {
    let assignments = env.assignments();
    match action {
        PhaseAction::Script { body, .. } => {
            let mut delimiter = "SHIPYARD_EOF".to_string();
            while body.lines().any(|line| line.trim_end() == delimiter) {
                delimiter.push('_');
            }
            let body = body.trim_end_matches('\n');
            format!(
                "export {};\nsh -s <<'{}'\n{}\n{}\n",
                assignments, delimiter, body, delimiter
            )
        }
        PhaseAction::Command(command) => format!("export {}; {}", assignments, command),
        PhaseAction::BuiltinDefault(command) => format!("export {}; {}", assignments, command),
    }
}
