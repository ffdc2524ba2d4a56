//! CI config parsing tests for cinder-core.

use cinder_core::Error;
use cinder_core::ci_config::CiConfig;
use cinder_core::job::When;
use pretty_assertions::assert_eq;

const DEPLOY_CONFIG: &str = r#"
stages:
  - build
  - deploy

variables:
  TARGET: production
  REPLICAS: 3

.template:
  script: echo hidden

compile:
  stage: build
  script:
    - cargo build --release
  tags: [linux, docker]

deploy:
  stage: deploy
  script: ./deploy.sh $TARGET
  resource_group: $CI_COMMIT_REF_NAME-$CI_JOB_NAME
  timeout: 1h 30m
  environment: production

rollback:
  stage: deploy
  script: ./rollback.sh
  when: manual
  resource_group: production
"#;

#[test]
fn test_parse_jobs_in_file_order() {
    let config = CiConfig::parse(DEPLOY_CONFIG).expect("parse");

    let names: Vec<&str> = config.jobs.iter().map(|j| j.name.as_str()).collect();
    assert_eq!(names, vec!["compile", "deploy", "rollback"]);
    assert_eq!(config.stages, vec![".pre", "build", "deploy", ".post"]);
    assert_eq!(config.stage_index("deploy"), Some(2));
}

#[test]
fn test_parse_job_attributes() {
    let config = CiConfig::parse(DEPLOY_CONFIG).expect("parse");

    let compile = config.job("compile").unwrap();
    assert_eq!(compile.script, vec!["cargo build --release"]);
    assert_eq!(compile.tags, vec!["linux", "docker"]);
    assert_eq!(compile.resource_group, None);

    let deploy = config.job("deploy").unwrap();
    assert_eq!(
        deploy.resource_group.as_deref(),
        Some("$CI_COMMIT_REF_NAME-$CI_JOB_NAME")
    );
    assert_eq!(deploy.timeout_secs, Some(5400));
    assert_eq!(deploy.when, When::OnSuccess);

    let rollback = config.job("rollback").unwrap();
    assert_eq!(rollback.when, When::Manual);
}

#[test]
fn test_parse_variables_as_strings() {
    let config = CiConfig::parse(DEPLOY_CONFIG).expect("parse");
    assert_eq!(config.variables.get("TARGET").unwrap(), "production");
    assert_eq!(config.variables.get("REPLICAS").unwrap(), "3");
}

#[test]
fn test_default_stages() {
    let config = CiConfig::parse("rspec:\n  script: rspec\n").expect("parse");
    let rspec = config.job("rspec").unwrap();
    assert_eq!(rspec.stage, "test");
    assert_eq!(config.stages, vec![".pre", "build", "test", "deploy", ".post"]);
}

#[test]
fn test_invalid_yaml_is_rejected() {
    let err = CiConfig::parse("rspec:\n  script: [unclosed\n").unwrap_err();
    assert!(matches!(err, Error::InvalidConfig(_)));
    assert!(!err.to_string().is_empty());
}

#[test]
fn test_non_mapping_root_is_rejected() {
    let err = CiConfig::parse("- just\n- a list\n").unwrap_err();
    assert_eq!(
        err.to_string(),
        "Invalid CI config: Invalid configuration format"
    );
}

#[test]
fn test_unknown_stage_is_rejected() {
    let err = CiConfig::parse("stages: [build]\nrspec:\n  stage: test\n  script: rspec\n")
        .unwrap_err();
    assert!(err.to_string().contains("chosen stage test does not exist"));
}

#[test]
fn test_blank_script_is_rejected() {
    let err = CiConfig::parse("rspec:\n  stage: test\n").unwrap_err();
    assert!(err.to_string().contains("jobs:rspec script can't be blank"));
}

#[test]
fn test_unknown_job_key_is_rejected() {
    let err = CiConfig::parse("rspec:\n  script: rspec\n  retries: 3\n").unwrap_err();
    assert!(err.to_string().contains("jobs:rspec config"));
}

#[test]
fn test_config_without_visible_jobs_is_rejected() {
    let err = CiConfig::parse("stages: [build]\n.hidden:\n  script: echo\n").unwrap_err();
    assert!(matches!(err, Error::InvalidConfig(_)));
}

#[test]
fn test_bad_timeout_is_rejected() {
    let err = CiConfig::parse("rspec:\n  script: rspec\n  timeout: whenever\n").unwrap_err();
    assert!(err.to_string().contains("timeout should be a duration"));
}
