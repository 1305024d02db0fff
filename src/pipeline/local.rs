//! Local two-stage compile: template compiler, then script compiler

use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, warn};

use super::diagnostics::{Diagnostic, Stage};
use super::process::{CommandSpec, ProcessRunner};
use crate::cache::scratch_path_in;
use crate::config::ToolConfig;
use crate::request::BuildRequest;

/// Outcome of the local path before debug gating
#[derive(Debug)]
pub(crate) enum LocalOutcome {
    Compiled(Vec<u8>),
    Failed(Diagnostic),
}

/// Removes a generated file when dropped
struct ScratchFile(PathBuf);

impl Drop for ScratchFile {
    fn drop(&mut self) {
        if self.0.exists() {
            if let Err(e) = fs::remove_file(&self.0) {
                warn!("failed to remove {}: {}", self.0.display(), e);
            }
        }
    }
}

/// Script compiler command without inputs
pub fn script_compiler_command(tools: &ToolConfig, req: &BuildRequest) -> CommandSpec {
    let mut cmd = CommandSpec::new(&tools.java)
        .arg("-jar")
        .arg(tools.script_compiler_jar.to_string_lossy())
        .arg("--compilation_level")
        .arg(req.optimization_level().as_flag())
        .arg("--warning_level")
        .arg(req.warning_level().as_flag());

    if req.pretty_print() {
        cmd.push("--formatting");
        cmd.push("pretty_print");
    }
    if let Some(wrapper) = req.output_wrapper() {
        cmd.push("--output_wrapper");
        cmd.push(wrapper);
    }
    cmd
}

/// Template compiler command writing to `output`
pub fn template_compiler_command(tools: &ToolConfig, output: &Path, templates: &[&Path]) -> CommandSpec {
    let mut cmd = CommandSpec::new(&tools.java)
        .arg("-jar")
        .arg(tools.template_compiler_jar.to_string_lossy())
        .arg("--outputPathFormat")
        .arg(output.to_string_lossy());
    for template in templates {
        cmd.push(template.to_string_lossy());
    }
    cmd
}

/// Run the local pipeline. Generated template output lives in `scratch_dir`
/// and is removed before returning.
pub(crate) fn compile(
    req: &BuildRequest,
    tools: &ToolConfig,
    runner: &dyn ProcessRunner,
    scratch_dir: &Path,
) -> LocalOutcome {
    let (templates, scripts) = req.partition_sources();
    let mut script_cmd = script_compiler_command(tools, req);
    for script in &scripts {
        script_cmd.push("--js");
        script_cmd.push(script.to_string_lossy());
    }

    let mut _scratch = None;
    if !templates.is_empty() {
        let output = scratch_path_in(scratch_dir, "soy", "js");
        let template_cmd = template_compiler_command(tools, &output, &templates);
        _scratch = Some(ScratchFile(output.clone()));

        if let Err(diag) = run_stage(runner, Stage::Template, &template_cmd) {
            return LocalOutcome::Failed(diag);
        }

        script_cmd.push("--js");
        script_cmd.push(tools.template_runtime.to_string_lossy());
        script_cmd.push("--js");
        script_cmd.push(output.to_string_lossy());
    }

    for extern_file in req.externs() {
        script_cmd.push("--externs");
        script_cmd.push(extern_file.to_string_lossy());
    }

    match run_stage(runner, Stage::Script, &script_cmd) {
        Ok(stdout) => LocalOutcome::Compiled(stdout),
        Err(diag) => LocalOutcome::Failed(diag),
    }
}

fn run_stage(runner: &dyn ProcessRunner, stage: Stage, cmd: &CommandSpec) -> Result<Vec<u8>, Diagnostic> {
    let output = runner
        .run(cmd)
        .map_err(|e| Diagnostic::with_reason(stage, cmd.to_string(), format!("failed to run: {}", e)))?;

    if !output.failed() {
        debug!("{} produced {} bytes", stage, output.stdout.len());
        return Ok(output.stdout);
    }

    let diag = if output.stderr.is_empty() {
        Diagnostic::with_reason(stage, cmd.to_string(), output.failure_reason())
    } else {
        Diagnostic::new(stage, cmd.to_string(), &output.stderr_text())
    };
    Err(diag)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::process::ProcessOutput;
    use std::io;
    use std::sync::Mutex;

    /// Replays canned outputs and records commands
    struct ScriptedRunner {
        outputs: Mutex<Vec<io::Result<ProcessOutput>>>,
        seen: Mutex<Vec<CommandSpec>>,
    }

    impl ScriptedRunner {
        fn new(outputs: Vec<io::Result<ProcessOutput>>) -> Self {
            Self {
                outputs: Mutex::new(outputs),
                seen: Mutex::new(Vec::new()),
            }
        }

        fn seen(&self) -> Vec<CommandSpec> {
            self.seen.lock().unwrap().clone()
        }
    }

    impl ProcessRunner for ScriptedRunner {
        fn run(&self, command: &CommandSpec) -> io::Result<ProcessOutput> {
            self.seen.lock().unwrap().push(command.clone());
            self.outputs.lock().unwrap().remove(0)
        }
    }

    fn tools() -> ToolConfig {
        ToolConfig::default()
    }

    #[test]
    fn test_script_command_flags() {
        let req = BuildRequest::builder()
            .add("a.js")
            .simple_mode()
            .quiet()
            .pretty_print(true)
            .wrap_output()
            .build()
            .unwrap();
        let cmd = script_compiler_command(&tools(), &req);

        assert_eq!(cmd.program, "java");
        assert_eq!(cmd.values_of("-jar"), vec!["compiler.jar"]);
        assert_eq!(cmd.values_of("--compilation_level"), vec!["SIMPLE_OPTIMIZATIONS"]);
        assert_eq!(cmd.values_of("--warning_level"), vec!["QUIET"]);
        assert_eq!(cmd.values_of("--formatting"), vec!["pretty_print"]);
        assert_eq!(cmd.values_of("--output_wrapper"), vec!["(function(){%output%})();"]);
    }

    #[test]
    fn test_script_command_omits_optional_flags() {
        let req = BuildRequest::builder().add("a.js").build().unwrap();
        let cmd = script_compiler_command(&tools(), &req);
        assert!(cmd.position("--formatting").is_none());
        assert!(cmd.position("--output_wrapper").is_none());
    }

    #[test]
    fn test_scripts_then_externs() {
        let req = BuildRequest::builder()
            .add("a.js")
            .add("b.js")
            .add_extern("ext.js")
            .build()
            .unwrap();
        let runner = ScriptedRunner::new(vec![Ok(ProcessOutput::success("1;2;"))]);
        let scratch = tempfile::TempDir::new().unwrap();

        let outcome = compile(&req, &tools(), &runner, scratch.path());
        assert!(matches!(outcome, LocalOutcome::Compiled(ref out) if out == b"1;2;"));

        let seen = runner.seen();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].values_of("--js"), vec!["a.js", "b.js"]);
        assert_eq!(seen[0].values_of("--externs"), vec!["ext.js"]);
        assert!(seen[0].position("--js") < seen[0].position("--externs"));
    }

    #[test]
    fn test_templates_compiled_first() {
        let req = BuildRequest::builder()
            .add("a.js")
            .add("view.soy")
            .build()
            .unwrap();
        let runner = ScriptedRunner::new(vec![
            Ok(ProcessOutput::success("")),
            Ok(ProcessOutput::success("compiled")),
        ]);
        let scratch = tempfile::TempDir::new().unwrap();

        let outcome = compile(&req, &tools(), &runner, scratch.path());
        assert!(matches!(outcome, LocalOutcome::Compiled(_)));

        let seen = runner.seen();
        assert_eq!(seen.len(), 2);
        let soy_out = seen[0].values_of("--outputPathFormat")[0].to_string();
        assert!(soy_out.starts_with(&scratch.path().join("soy-").to_string_lossy().into_owned()));
        assert!(seen[0].args.last().map(String::as_str) == Some("view.soy"));
        assert_eq!(seen[1].values_of("--js"), vec!["a.js", "soyutils.js", soy_out.as_str()]);
    }

    #[test]
    fn test_template_output_removed() {
        let req = BuildRequest::builder().add("view.soy").build().unwrap();
        let scratch = tempfile::TempDir::new().unwrap();

        // Simulate the template compiler writing its output file
        struct WritingRunner;
        impl ProcessRunner for WritingRunner {
            fn run(&self, command: &CommandSpec) -> io::Result<ProcessOutput> {
                if let Some(path) = command.values_of("--outputPathFormat").first() {
                    fs::write(path, "var soy;")?;
                }
                Ok(ProcessOutput::success("done"))
            }
        }

        let outcome = compile(&req, &tools(), &WritingRunner, scratch.path());
        assert!(matches!(outcome, LocalOutcome::Compiled(_)));
        assert_eq!(fs::read_dir(scratch.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_template_failure_stops_pipeline() {
        let req = BuildRequest::builder()
            .add("a.js")
            .add("view.soy")
            .build()
            .unwrap();
        let runner = ScriptedRunner::new(vec![Ok(ProcessOutput {
            exit_code: Some(1),
            stderr: b"view.soy: parse error".to_vec(),
            ..ProcessOutput::default()
        })]);
        let scratch = tempfile::TempDir::new().unwrap();

        match compile(&req, &tools(), &runner, scratch.path()) {
            LocalOutcome::Failed(diag) => {
                assert_eq!(diag.stage, Stage::Template);
                assert_eq!(diag.lines, vec!["view.soy: parse error"]);
                assert!(diag.command.contains("SoyToJsSrcCompiler.jar"));
            }
            other => panic!("expected failure, got {:?}", other),
        }
        assert_eq!(runner.seen().len(), 1);
    }

    #[test]
    fn test_stderr_fails_despite_zero_exit() {
        let req = BuildRequest::builder().add("a.js").build().unwrap();
        let runner = ScriptedRunner::new(vec![Ok(ProcessOutput {
            stderr: b"a.js:1: WARNING - dangerous use of this".to_vec(),
            ..ProcessOutput::success("1;")
        })]);
        let scratch = tempfile::TempDir::new().unwrap();

        match compile(&req, &tools(), &runner, scratch.path()) {
            LocalOutcome::Failed(diag) => assert_eq!(diag.stage, Stage::Script),
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[test]
    fn test_spawn_failure_is_diagnostic() {
        let req = BuildRequest::builder().add("a.js").build().unwrap();
        let runner = ScriptedRunner::new(vec![Err(io::Error::new(io::ErrorKind::NotFound, "no java"))]);
        let scratch = tempfile::TempDir::new().unwrap();

        match compile(&req, &tools(), &runner, scratch.path()) {
            LocalOutcome::Failed(diag) => {
                assert_eq!(diag.lines.len(), 1);
                assert!(diag.lines[0].contains("no java"));
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }
}
