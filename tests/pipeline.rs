mod common;

use std::fs;

use common::{FakeRunner, Host, ScriptedPrompter};
use meter_deploy::deploy::{Context, Mode, Pipeline, PipelineOptions, Stage, StageOutcome};
use meter_deploy::error::{CommandError, DeployError, PreconditionError};
use meter_deploy::prompt::ConflictPolicy;

fn probes_left(host: &Host) -> Vec<String> {
    fs::read_dir(host.app_path())
        .map(|entries| {
            entries
                .filter_map(Result::ok)
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .filter(|n| n.starts_with(".deploy-probe-"))
                .collect()
        })
        .unwrap_or_default()
}

#[tokio::test]
async fn test_deploy_writes_http_vhost_and_runtime_config() {
    let host = Host::new().with_sources();
    let config = host.config(&[]);
    let runner = FakeRunner::new();
    let prompter = ScriptedPrompter::new();

    let ctx = Context::new(&config, &runner, &prompter, ConflictPolicy::AskOperator);
    let report = Pipeline::new(ctx, Mode::Deploy, PipelineOptions::default())
        .run()
        .await
        .unwrap();

    assert!(report.outcomes.iter().all(|(_, o)| *o == StageOutcome::Completed));
    assert_eq!(report.outcomes.len(), Mode::Deploy.stages().len());

    let vhost = fs::read_to_string(host.apache_vhost()).unwrap();
    assert!(vhost.contains("ServerName a.example.com"));
    assert!(!vhost.contains("SSLEngine"));
    assert!(!vhost.contains("{{"));

    let runtime = fs::read_to_string(host.app_path().join("config.php")).unwrap();
    assert!(runtime.contains("Europe/Berlin"));
    assert!(runtime.contains("demo"));

    for name in ["index.php", "api.php", "functions.php"] {
        assert!(host.app_path().join(name).is_file(), "{} not synced", name);
    }
    assert_eq!(runner.matching("a2ensite", &["meter"]).len(), 1);
    assert_eq!(runner.matching("systemctl", &["reload", "apache2"]).len(), 1);
    assert!(probes_left(&host).is_empty());

    // The default vhost sets security headers, so mod_headers is enabled
    // before the syntax check runs.
    assert!(vhost.contains("Header always set"));
    let commands = runner.recorded();
    let enmod = commands.iter().position(|c| c.is("a2enmod", &["headers"])).unwrap();
    let configtest = commands.iter().position(|c| c.is("apache2ctl", &["configtest"])).unwrap();
    assert!(enmod < configtest);
}

#[tokio::test]
async fn test_missing_required_file_copies_nothing() {
    let host = Host::new();
    host.write_source("index.php", "<?php\n");
    host.write_source("functions.php", "<?php\n");
    let config = host.config(&[]);
    let runner = FakeRunner::new();
    let prompter = ScriptedPrompter::new();

    let ctx = Context::new(&config, &runner, &prompter, ConflictPolicy::AskOperator);
    let err = Pipeline::new(ctx, Mode::Deploy, PipelineOptions::default())
        .run()
        .await
        .unwrap_err();

    match err {
        DeployError::StageFailed { stage, source } => {
            assert_eq!(stage, Stage::FileSync);
            match *source {
                DeployError::Precondition(PreconditionError::MissingSourceFiles { missing, .. }) => {
                    assert_eq!(missing, vec!["api.php"]);
                }
                other => panic!("unexpected cause {:?}", other),
            }
        }
        other => panic!("unexpected error {:?}", other),
    }

    assert!(common::tree(&host.app_path()).is_empty());
    assert!(!host.apache_vhost().exists());
}

#[tokio::test]
async fn test_running_as_root_stops_before_any_change() {
    let host = Host::new().with_sources();
    let config = host.config(&[]);
    let runner = FakeRunner {
        root: true,
        ..FakeRunner::default()
    };
    let prompter = ScriptedPrompter::new();

    let ctx = Context::new(&config, &runner, &prompter, ConflictPolicy::AskOperator);
    let err = Pipeline::new(ctx, Mode::Provision, PipelineOptions::default())
        .run()
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        DeployError::StageFailed { stage: Stage::Preflight, ref source }
            if matches!(**source, DeployError::Precondition(PreconditionError::RunningAsRoot))
    ));
    assert_eq!(runner.recorded().len(), 1);
    assert!(!host.app_path().exists());
}

#[tokio::test]
async fn test_missing_required_setting_fails_before_commands() {
    let host = Host::new().with_sources();
    let config = host.config(&[("general", "app_name", "")]);
    let runner = FakeRunner::new();
    let prompter = ScriptedPrompter::new();

    let ctx = Context::new(&config, &runner, &prompter, ConflictPolicy::AskOperator);
    let err = Pipeline::new(ctx, Mode::Deploy, PipelineOptions::default())
        .run()
        .await
        .unwrap_err();

    assert!(err.to_string().contains("app_name"));
    assert!(runner.recorded().is_empty());
}

#[tokio::test]
async fn test_probe_is_removed_when_it_fails() {
    let host = Host::new().with_sources();
    let config = host.config(&[]);
    let runner = FakeRunner {
        probe_fails: true,
        ..FakeRunner::default()
    };
    let prompter = ScriptedPrompter::new();

    let ctx = Context::new(&config, &runner, &prompter, ConflictPolicy::AskOperator);
    let err = Pipeline::new(ctx, Mode::Deploy, PipelineOptions::default())
        .run()
        .await
        .unwrap_err();

    assert!(matches!(err, DeployError::StageFailed { stage: Stage::Verification, .. }));
    assert!(probes_left(&host).is_empty());
    // Without --rollback-on-failure the written artifacts stay.
    assert!(host.apache_vhost().exists());
}

#[tokio::test]
async fn test_rollback_on_failure_removes_created_artifacts() {
    let host = Host::new().with_sources();
    let config = host.config(&[]);
    let runner = FakeRunner {
        probe_fails: true,
        ..FakeRunner::default()
    };
    let prompter = ScriptedPrompter::new();

    let options = PipelineOptions {
        rollback_on_failure: true,
    };
    let ctx = Context::new(&config, &runner, &prompter, ConflictPolicy::AskOperator);
    assert!(Pipeline::new(ctx, Mode::Deploy, options).run().await.is_err());

    assert!(!host.apache_vhost().exists());
    assert!(!host.app_path().join("config.php").exists());
    assert!(host.app_path().join("index.php").exists());
}

#[tokio::test]
async fn test_keep_existing_leaves_vhost_untouched() {
    let host = Host::new().with_sources();
    fs::create_dir_all(host.apache_vhost().parent().unwrap()).unwrap();
    fs::write(host.apache_vhost(), "# hand edited\n").unwrap();
    let config = host.config(&[]);
    let runner = FakeRunner::new();
    let prompter = ScriptedPrompter::new();

    let ctx = Context::new(&config, &runner, &prompter, ConflictPolicy::NeverOverwrite);
    let report = Pipeline::new(ctx, Mode::Deploy, PipelineOptions::default())
        .run()
        .await
        .unwrap();

    assert_eq!(report.outcome(Stage::WebServerConfig), Some(&StageOutcome::Kept));
    assert_eq!(fs::read_to_string(host.apache_vhost()).unwrap(), "# hand edited\n");
    assert!(runner.matching("systemctl", &["reload"]).is_empty());
    assert!(runner.matching("a2ensite", &[]).is_empty());
}

#[tokio::test]
async fn test_operator_is_asked_before_overwriting() {
    let host = Host::new().with_sources();
    fs::create_dir_all(host.apache_vhost().parent().unwrap()).unwrap();
    fs::write(host.apache_vhost(), "# old\n").unwrap();
    let config = host.config(&[]);
    let runner = FakeRunner::new();
    let prompter = ScriptedPrompter::new().confirming(&[true]);

    let ctx = Context::new(&config, &runner, &prompter, ConflictPolicy::AskOperator);
    Pipeline::new(ctx, Mode::Deploy, PipelineOptions::default())
        .run()
        .await
        .unwrap();

    let asked = prompter.questions();
    assert!(asked
        .iter()
        .any(|q| q.ends_with("meter.conf already exists. Overwrite?")));
    assert!(fs::read_to_string(host.apache_vhost())
        .unwrap()
        .contains("ServerName a.example.com"));
}

#[tokio::test]
async fn test_no_active_server_skips_vhost() {
    let host = Host::new().with_sources();
    let config = host.config(&[]);
    let runner = FakeRunner {
        apache_active: false,
        ..FakeRunner::default()
    };
    let prompter = ScriptedPrompter::new();

    let ctx = Context::new(&config, &runner, &prompter, ConflictPolicy::AskOperator);
    let report = Pipeline::new(ctx, Mode::Deploy, PipelineOptions::default())
        .run()
        .await
        .unwrap();

    assert!(matches!(report.outcome(Stage::WebServerConfig), Some(StageOutcome::Skipped(_))));
    assert!(!host.apache_vhost().exists());
}

#[tokio::test]
async fn test_nginx_site_is_linked_into_sites_enabled() {
    let host = Host::new().with_sources();
    let config = host.config(&[]);
    let runner = FakeRunner {
        apache_active: false,
        nginx_active: true,
        ..FakeRunner::default()
    };
    let prompter = ScriptedPrompter::new();

    let ctx = Context::new(&config, &runner, &prompter, ConflictPolicy::AskOperator);
    Pipeline::new(ctx, Mode::Deploy, PipelineOptions::default())
        .run()
        .await
        .unwrap();

    let available = host.root().join("nginx/sites-available/meter");
    let enabled = host.root().join("nginx/sites-enabled/meter");
    assert!(fs::read_to_string(&available).unwrap().contains("a.example.com"));
    assert_eq!(fs::read_link(&enabled).unwrap(), available);
    assert_eq!(runner.matching("nginx", &["-t"]).len(), 1);
}

#[tokio::test]
async fn test_provision_skips_disabled_features() {
    let host = Host::new().with_sources();
    let config = host.config(&[]);
    let runner = FakeRunner::new();
    let prompter = ScriptedPrompter::new();

    let ctx = Context::new(&config, &runner, &prompter, ConflictPolicy::AskOperator);
    let report = Pipeline::new(ctx, Mode::Provision, PipelineOptions::default())
        .run()
        .await
        .unwrap();

    for stage in [Stage::LogRotationSetup, Stage::ServiceSetup, Stage::TlsSetup] {
        assert_eq!(report.outcome(stage), Some(&StageOutcome::Skipped("disabled".to_string())));
    }
    assert!(runner.matching("certbot", &[]).is_empty());
}

#[tokio::test]
async fn test_tls_requests_every_name_and_sets_stapling_once() {
    let host = Host::new().with_sources();
    let overrides = [
        ("ssl", "enable_ssl", "true"),
        ("ssl", "ssl_alt_domains", "www.a.example.com, api.a.example.com"),
    ];
    let config = host.config(&overrides);

    for run in 0..2 {
        let runner = FakeRunner::new();
        let prompter = ScriptedPrompter::new();
        let ctx = Context::new(&config, &runner, &prompter, ConflictPolicy::AlwaysOverwrite);
        let report = Pipeline::new(ctx, Mode::Provision, PipelineOptions::default())
            .run()
            .await
            .unwrap();
        assert_eq!(report.outcome(Stage::TlsSetup), Some(&StageOutcome::Completed));

        let certbot = runner.matching("certbot", &["certonly"]);
        assert_eq!(certbot.len(), 1);
        let args = &certbot[0].args;
        for name in ["a.example.com", "www.a.example.com", "api.a.example.com"] {
            assert!(
                args.windows(2).any(|w| w[0] == "-d" && w[1] == name),
                "certbot not asked for {}",
                name
            );
        }
        assert!(args.windows(2).any(|w| w[0] == "--email" && w[1] == "ops@example.com"));
        assert_eq!(runner.matching("a2enmod", &["ssl"]).len(), 1);
        // The directive is only appended, and the conf enabled, once.
        let expected = if run == 0 { 1 } else { 0 };
        assert_eq!(runner.matching("a2enconf", &["ssl-stapling"]).len(), expected);
    }

    let stapling = fs::read_to_string(host.stapling_conf()).unwrap();
    assert_eq!(stapling.matches("SSLStaplingCache").count(), 1);

    let vhost = fs::read_to_string(host.apache_vhost()).unwrap();
    assert!(vhost.contains("SSLEngine on"));
    assert!(vhost.contains("ServerAlias www.a.example.com"));
}

#[tokio::test]
async fn test_tls_vhost_written_directly_when_certificate_exists() {
    let host = Host::new().with_sources();
    let config = host.config(&[("ssl", "enable_ssl", "true")]);
    let runner = FakeRunner {
        certificate_present: true,
        ..FakeRunner::default()
    };
    let prompter = ScriptedPrompter::new();

    let ctx = Context::new(&config, &runner, &prompter, ConflictPolicy::AskOperator);
    Pipeline::new(ctx, Mode::Deploy, PipelineOptions::default())
        .run()
        .await
        .unwrap();

    let vhost = fs::read_to_string(host.apache_vhost()).unwrap();
    assert!(vhost.contains("SSLEngine on"));
    assert!(runner.matching("certbot", &[]).is_empty());
}

fn stage_failure(err: DeployError) -> (Stage, DeployError) {
    match err {
        DeployError::StageFailed { stage, source } => (stage, *source),
        other => panic!("unexpected error {:?}", other),
    }
}

#[tokio::test]
async fn test_failed_syntax_check_stops_before_enabling_site() {
    let host = Host::new().with_sources();
    let config = host.config(&[]);
    let runner = FakeRunner {
        configtest_fails: true,
        ..FakeRunner::default()
    };
    let prompter = ScriptedPrompter::new();

    let ctx = Context::new(&config, &runner, &prompter, ConflictPolicy::AskOperator);
    let err = Pipeline::new(ctx, Mode::Deploy, PipelineOptions::default())
        .run()
        .await
        .unwrap_err();

    let (stage, cause) = stage_failure(err);
    assert_eq!(stage, Stage::WebServerConfig);
    match cause {
        DeployError::Command(CommandError::Failed { output, .. }) => {
            assert!(output.contains("Invalid command 'Header'"));
        }
        other => panic!("unexpected cause {:?}", other),
    }
    assert!(runner.matching("a2ensite", &[]).is_empty());
    assert!(runner.matching("systemctl", &["reload"]).is_empty());
    assert!(runner.recorded().iter().all(|c| c.run_as.is_none()));
}

#[tokio::test]
async fn test_failed_certificate_request_leaves_http_vhost() {
    let host = Host::new().with_sources();
    let config = host.config(&[("ssl", "enable_ssl", "true")]);
    let runner = FakeRunner {
        certbot_fails: true,
        ..FakeRunner::default()
    };
    let prompter = ScriptedPrompter::new();

    let ctx = Context::new(&config, &runner, &prompter, ConflictPolicy::AskOperator);
    let err = Pipeline::new(ctx, Mode::Provision, PipelineOptions::default())
        .run()
        .await
        .unwrap_err();

    let (stage, cause) = stage_failure(err);
    assert_eq!(stage, Stage::TlsSetup);
    assert!(matches!(cause, DeployError::Command(CommandError::Failed { .. })));
    assert_eq!(runner.matching("certbot", &["certonly"]).len(), 1);

    let vhost = fs::read_to_string(host.apache_vhost()).unwrap();
    assert!(vhost.contains("ServerName a.example.com"));
    assert!(!vhost.contains("SSLEngine"));
    // Only the HTTP stage reloaded the server.
    assert_eq!(runner.matching("systemctl", &["reload", "apache2"]).len(), 1);
}

#[tokio::test]
async fn test_service_unit_written_and_started_once() {
    let host = Host::new().with_sources();
    let unit = host.root().join("systemd/meeting-meter.service");
    let env = host.root().join("systemd/meeting-meter.env");
    let unit_arg = unit.display().to_string();
    let env_arg = env.display().to_string();
    let config = host.config(&[
        ("systemd", "enable_service", "true"),
        ("systemd", "service_file", unit_arg.as_str()),
        ("systemd", "env_file", env_arg.as_str()),
    ]);

    let runner = FakeRunner::new();
    let prompter = ScriptedPrompter::new();
    let ctx = Context::new(&config, &runner, &prompter, ConflictPolicy::AskOperator);
    let report = Pipeline::new(ctx, Mode::Provision, PipelineOptions::default())
        .run()
        .await
        .unwrap();

    assert_eq!(report.outcome(Stage::ServiceSetup), Some(&StageOutcome::Completed));
    let unit_text = fs::read_to_string(&unit).unwrap();
    assert!(unit_text.contains(&format!("EnvironmentFile={}", env.display())));
    assert!(unit_text.contains("After=network.target apache2.service"));
    let env_text = fs::read_to_string(&env).unwrap();
    assert!(env_text.contains("APP_DOMAIN=a.example.com"));
    assert!(env_text.contains(&format!("APP_WEB_ROOT={}", host.app_path().display())));
    assert_eq!(runner.matching("systemctl", &["daemon-reload"]).len(), 1);
    assert_eq!(runner.matching("systemctl", &["enable", "meeting-meter.service"]).len(), 1);
    assert_eq!(runner.matching("systemctl", &["start", "meeting-meter.service"]).len(), 1);

    // A unit that is already enabled and running is left alone.
    let runner = FakeRunner {
        unit_running: true,
        ..FakeRunner::default()
    };
    let prompter = ScriptedPrompter::new();
    let ctx = Context::new(&config, &runner, &prompter, ConflictPolicy::AlwaysOverwrite);
    let report = Pipeline::new(ctx, Mode::Provision, PipelineOptions::default())
        .run()
        .await
        .unwrap();

    assert_eq!(report.outcome(Stage::ServiceSetup), Some(&StageOutcome::Completed));
    assert!(runner.matching("systemctl", &["enable"]).is_empty());
    assert!(runner.matching("systemctl", &["start"]).is_empty());
}

#[tokio::test]
async fn test_logrotate_rule_respects_existing_file() {
    let host = Host::new().with_sources();
    let rule = host.root().join("logrotate.d/meeting-meter");
    let rule_arg = rule.display().to_string();
    let config = host.config(&[
        ("logrotate", "enable", "true"),
        ("logrotate", "file", rule_arg.as_str()),
    ]);

    let runner = FakeRunner::new();
    let prompter = ScriptedPrompter::new();
    let ctx = Context::new(&config, &runner, &prompter, ConflictPolicy::AskOperator);
    let report = Pipeline::new(ctx, Mode::Provision, PipelineOptions::default())
        .run()
        .await
        .unwrap();

    assert_eq!(report.outcome(Stage::LogRotationSetup), Some(&StageOutcome::Completed));
    let text = fs::read_to_string(&rule).unwrap();
    assert!(text.contains(&format!("{}/*.log {{", host.root().join("log").display())));
    assert!(text.contains("systemctl reload apache2"));

    fs::write(&rule, "# tuned by hand\n").unwrap();
    let runner = FakeRunner::new();
    let prompter = ScriptedPrompter::new();
    let ctx = Context::new(&config, &runner, &prompter, ConflictPolicy::NeverOverwrite);
    let report = Pipeline::new(ctx, Mode::Provision, PipelineOptions::default())
        .run()
        .await
        .unwrap();

    assert_eq!(report.outcome(Stage::LogRotationSetup), Some(&StageOutcome::Kept));
    assert!(prompter.questions().is_empty());
    assert_eq!(fs::read_to_string(&rule).unwrap(), "# tuned by hand\n");
}
