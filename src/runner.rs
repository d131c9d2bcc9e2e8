//! Chain execution.
//!
//! A run walks the chain's links in order. Each link's script must exist and
//! its shell must have registered options; the resulting command is handed to
//! a [`Launcher`]. The first failure stops the run. Links launched before that
//! keep running: every launch is detached and there is no rollback.
//!
//! After the run stops, the exit policy decides whether the host should
//! terminate immediately instead of reporting.

use std::process::Stdio;

use tokio::process::Command;

use crate::chains::{script_exists, ChainStore};
use crate::process::{ChainRun, LaunchCommand, Launched, RunStatus};
use crate::settings::ExitPolicy;
use crate::shells::ShellRegistry;

/// Starts a process for a resolved link.
pub trait Launcher {
    /// Returns the process ID when the platform reports one.
    fn launch(&mut self, command: &LaunchCommand) -> std::io::Result<Option<u32>>;
}

/// Spawns fully detached processes: null standard streams, a new session (or
/// process group on Windows), and no waiting on the child.
#[derive(Debug, Default)]
pub struct DetachedLauncher;

impl Launcher for DetachedLauncher {
    fn launch(&mut self, launch: &LaunchCommand) -> std::io::Result<Option<u32>> {
        let mut command = Command::new(&launch.program);
        command.args(&launch.args);
        if let Some(cwd) = &launch.cwd {
            command.current_dir(cwd);
        }
        command
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        command.kill_on_drop(false);

        #[cfg(windows)]
        {
            use windows_sys::Win32::System::Threading::{
                CREATE_NEW_PROCESS_GROUP, DETACHED_PROCESS,
            };
            command.creation_flags(CREATE_NEW_PROCESS_GROUP | DETACHED_PROCESS);
        }

        #[cfg(unix)]
        unsafe {
            command.pre_exec(|| {
                if libc::setsid() == -1 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }

        let child = command.spawn()?;
        Ok(child.id())
    }
}

/// Resolves every link without starting anything.
#[derive(Debug, Default)]
pub struct DryRunLauncher;

impl Launcher for DryRunLauncher {
    fn launch(&mut self, _command: &LaunchCommand) -> std::io::Result<Option<u32>> {
        Ok(None)
    }
}

/// Runs chains against the shell registry and chain store.
pub struct ChainRunner<'a> {
    chains: &'a ChainStore,
    shells: &'a ShellRegistry,
    policy: ExitPolicy,
}

impl<'a> ChainRunner<'a> {
    pub fn new(chains: &'a ChainStore, shells: &'a ShellRegistry, policy: ExitPolicy) -> Self {
        Self {
            chains,
            shells,
            policy,
        }
    }

    /// Runs the selected chain. `selection` is the list of selected chain
    /// names; only the first one is run.
    pub fn run<L: Launcher>(&self, selection: &[String], launcher: &mut L) -> ChainRun {
        let Some(name) = selection
            .first()
            .map(|name| name.trim())
            .filter(|name| !name.is_empty())
        else {
            return ChainRun {
                chain: None,
                status: RunStatus::NoSelection,
                launched: Vec::new(),
                exit_host: false,
            };
        };

        let mut run = ChainRun {
            chain: Some(name.to_string()),
            status: RunStatus::Success,
            launched: Vec::new(),
            exit_host: false,
        };

        let links = match self.chains.load(name) {
            Ok(links) => links,
            Err(err) => return self.fail(run, RunStatus::Aborted { error: err.to_string() }),
        };
        if links.is_empty() {
            run.status = RunStatus::Empty;
            return run;
        }

        for (index, link) in links.iter().enumerate() {
            if !script_exists(&link.script) {
                tracing::warn!(chain = name, index, script = %link.script, "script not found");
                run.status = RunStatus::ScriptMissing {
                    index,
                    script: link.script.clone(),
                };
                return run;
            }

            let options = match self.shells.get_shell_options(&link.shell) {
                Ok(options) => options,
                Err(err) => {
                    return self.fail(run, RunStatus::Aborted { error: err.to_string() })
                }
            };
            let command = LaunchCommand::for_link(link, &options);

            match launcher.launch(&command) {
                Ok(pid) => {
                    tracing::info!(chain = name, index, ?pid, command = %command.display(), "link launched");
                    run.launched.push(Launched {
                        index,
                        pid,
                        command,
                    });
                }
                Err(err) => {
                    tracing::warn!(chain = name, index, error = %err, "failed to launch link");
                    let status = RunStatus::SpawnFailed {
                        index,
                        script: link.script.clone(),
                        error: err.to_string(),
                    };
                    return self.fail(run, status);
                }
            }
        }

        run.exit_host = self.policy.exits_after_success();
        run
    }

    fn fail(&self, mut run: ChainRun, status: RunStatus) -> ChainRun {
        run.status = status;
        run.exit_host = self.policy.exits_after_failure();
        run
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chains::Link;
    use crate::paths::Layout;
    use std::fs;
    use std::path::Path;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingLauncher {
        commands: Vec<LaunchCommand>,
        fail_at: Option<usize>,
    }

    impl Launcher for RecordingLauncher {
        fn launch(&mut self, command: &LaunchCommand) -> std::io::Result<Option<u32>> {
            if self.fail_at == Some(self.commands.len()) {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::PermissionDenied,
                    "denied",
                ));
            }
            self.commands.push(command.clone());
            Ok(Some(1000 + self.commands.len() as u32))
        }
    }

    struct Fixture {
        dir: tempfile::TempDir,
        chains: ChainStore,
        shells: ShellRegistry,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            for sub in ["Shells", "Chains"] {
                fs::create_dir_all(dir.path().join(sub)).unwrap();
            }
            let shells_dir = dir.path().join("Shells");
            fs::write(shells_dir.join("shells.csv"), "bash\n").unwrap();
            fs::write(shells_dir.join("identities.csv"), "bash,Bash\n").unwrap();
            fs::write(shells_dir.join("shell_options.csv"), "bash,-e,{script},\n").unwrap();
            let layout = Layout::new(dir.path());
            let chains = ChainStore::new(layout.clone());
            let shells = ShellRegistry::new(layout, chains.clone(), Duration::from_secs(1));
            Self { dir, chains, shells }
        }

        fn script(&self, name: &str) -> String {
            let path = self.dir.path().join(name);
            fs::write(&path, "echo hi\n").unwrap();
            path.to_string_lossy().to_string()
        }

        fn missing(&self, name: &str) -> String {
            self.dir.path().join(name).to_string_lossy().to_string()
        }

        fn run(&self, policy: ExitPolicy, launcher: &mut RecordingLauncher) -> ChainRun {
            ChainRunner::new(&self.chains, &self.shells, policy)
                .run(&["job".to_string()], launcher)
        }
    }

    #[test]
    fn missing_script_spawns_nothing() {
        let fx = Fixture::new();
        let script = fx.missing("missing.sh");
        fx.chains.save("job", &[Link::new("bash", &script)]).unwrap();

        let mut launcher = RecordingLauncher::default();
        let run = fx.run(ExitPolicy::Always, &mut launcher);
        assert!(matches!(run.status, RunStatus::ScriptMissing { index: 0, .. }));
        assert!(run.message().starts_with("Script not found"));
        assert!(launcher.commands.is_empty());
        assert!(!run.exit_host);
    }

    #[test]
    fn launches_links_in_order() {
        let fx = Fixture::new();
        let a = fx.script("a.sh");
        let b = fx.script("b.sh");
        fx.chains
            .save("job", &[Link::new("bash", &a), Link::new("bash", &b)])
            .unwrap();

        let mut launcher = RecordingLauncher::default();
        let run = fx.run(ExitPolicy::Never, &mut launcher);
        assert_eq!(run.status, RunStatus::Success);
        assert!(!run.exit_host);
        assert_eq!(run.launched.len(), 2);
        assert_eq!(launcher.commands[0].argv(), vec!["bash", "-e", a.as_str()]);
        assert_eq!(launcher.commands[1].argv(), vec!["bash", "-e", b.as_str()]);
        let dir = fx.dir.path().to_string_lossy().to_string();
        assert_eq!(launcher.commands[0].cwd.as_deref(), Some(dir.as_str()));
    }

    #[test]
    fn always_policy_exits_after_launching() {
        let fx = Fixture::new();
        let a = fx.script("a.sh");
        let b = fx.script("b.sh");
        fx.chains
            .save("job", &[Link::new("bash", &a), Link::new("bash", &b)])
            .unwrap();

        let mut launcher = RecordingLauncher::default();
        let run = fx.run(ExitPolicy::Always, &mut launcher);
        assert_eq!(run.status, RunStatus::Success);
        assert!(run.exit_host);
    }

    #[test]
    fn later_missing_script_keeps_earlier_launches() {
        let fx = Fixture::new();
        let a = fx.script("a.sh");
        let gone = fx.missing("gone.sh");
        let c = fx.script("c.sh");
        fx.chains
            .save(
                "job",
                &[
                    Link::new("bash", &a),
                    Link::new("bash", &gone),
                    Link::new("bash", &c),
                ],
            )
            .unwrap();

        let mut launcher = RecordingLauncher::default();
        let run = fx.run(ExitPolicy::Never, &mut launcher);
        assert!(matches!(run.status, RunStatus::ScriptMissing { index: 1, .. }));
        assert_eq!(launcher.commands.len(), 1);
        assert_eq!(run.launched.len(), 1);
    }

    #[test]
    fn spawn_failure_is_gated_by_policy() {
        let fx = Fixture::new();
        let a = fx.script("a.sh");
        let b = fx.script("b.sh");
        fx.chains
            .save("job", &[Link::new("bash", &a), Link::new("bash", &b)])
            .unwrap();

        for (policy, exits) in [
            (ExitPolicy::Never, false),
            (ExitPolicy::AfterSuccessOnly, false),
            (ExitPolicy::AfterFailureOnly, true),
            (ExitPolicy::Always, true),
        ] {
            let mut launcher = RecordingLauncher {
                fail_at: Some(1),
                ..Default::default()
            };
            let run = fx.run(policy, &mut launcher);
            assert!(
                matches!(run.status, RunStatus::SpawnFailed { index: 1, .. }),
                "{policy:?}"
            );
            assert_eq!(run.exit_host, exits, "{policy:?}");
            assert_eq!(run.launched.len(), 1);
        }
    }

    #[test]
    fn success_only_policy_exits_on_success() {
        let fx = Fixture::new();
        let a = fx.script("a.sh");
        fx.chains.save("job", &[Link::new("bash", &a)]).unwrap();
        let mut launcher = RecordingLauncher::default();
        assert!(fx.run(ExitPolicy::AfterSuccessOnly, &mut launcher).exit_host);
        let mut launcher = RecordingLauncher::default();
        assert!(!fx.run(ExitPolicy::AfterFailureOnly, &mut launcher).exit_host);
    }

    #[test]
    fn unregistered_shell_aborts_the_run() {
        let fx = Fixture::new();
        let a = fx.script("a.sh");
        fx.chains.save("job", &[Link::new("/bin/unknown", &a)]).unwrap();

        let mut launcher = RecordingLauncher::default();
        let run = fx.run(ExitPolicy::AfterFailureOnly, &mut launcher);
        assert!(matches!(run.status, RunStatus::Aborted { .. }));
        assert!(run.exit_host);
        assert!(launcher.commands.is_empty());
    }

    #[test]
    fn empty_chain_and_empty_selection_are_not_failures() {
        let fx = Fixture::new();
        fx.chains.save("job", &[]).unwrap();
        let mut launcher = RecordingLauncher::default();
        let run = fx.run(ExitPolicy::Always, &mut launcher);
        assert_eq!(run.status, RunStatus::Empty);
        assert!(!run.exit_host);

        let run = ChainRunner::new(&fx.chains, &fx.shells, ExitPolicy::Always)
            .run(&[], &mut launcher);
        assert_eq!(run.status, RunStatus::NoSelection);
        assert!(!run.exit_host);
    }

    #[test]
    fn missing_chain_file_aborts() {
        let fx = Fixture::new();
        let mut launcher = RecordingLauncher::default();
        let run = fx.run(ExitPolicy::Never, &mut launcher);
        assert!(matches!(run.status, RunStatus::Aborted { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn detached_launch_runs_in_script_directory() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("touch.sh");
        fs::write(&script, "touch ran.marker\n").unwrap();
        let command = LaunchCommand::for_link(
            &Link::new("/bin/sh", script.to_string_lossy()),
            &crate::shells::ShellOptions::with_flags("/bin/sh", "", ""),
        );

        let pid = DetachedLauncher.launch(&command).unwrap();
        assert!(pid.is_some());

        let marker = dir.path().join("ran.marker");
        for _ in 0..50 {
            if Path::new(&marker).exists() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        panic!("detached script did not run");
    }
}
