use agent_trainer::AppError;

#[test]
fn display_prefixes_each_variant() {
    let cases = [
        (AppError::Config("bad".into()), "config: bad"),
        (AppError::ScenarioNotFound("s1".into()), "scenario not found: s1"),
        (AppError::Scenario("dup".into()), "scenario: dup"),
        (AppError::Channel("closed".into()), "channel: closed"),
        (AppError::Provider("boom".into()), "provider: boom"),
        (AppError::Timeout("slow".into()), "timeout: slow"),
        (AppError::Registry("dup id".into()), "registry: dup id"),
        (AppError::CapacityExceeded("4/4".into()), "capacity exceeded: 4/4"),
        (AppError::Io("disk".into()), "io: disk"),
    ];
    for (err, expected) in cases {
        assert_eq!(err.to_string(), expected);
    }
}

#[test]
fn io_error_converts_to_io_variant() {
    let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
    let err: AppError = io.into();
    assert!(matches!(err, AppError::Io(ref msg) if msg == "gone"));
}

#[test]
fn toml_error_converts_to_config_variant() {
    let parse: Result<toml::Value, _> = toml::from_str("not = [valid");
    let err: AppError = parse.expect_err("invalid toml").into();
    assert!(matches!(err, AppError::Config(ref msg) if msg.starts_with("invalid config")));
}
