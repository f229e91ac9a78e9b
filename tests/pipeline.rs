use g2burn::designer::{generate, parse_shapes, MotionInstruction};
use g2burn::settings::Config;
use g2burn::{generator_settings, Units};
use tempfile::TempDir;

const SHAPES: &str = r#"[
    {"type": "line", "start": {"x": 0.0, "y": 0.0}, "end": {"x": 10.0, "y": 0.0}},
    {"type": "rectangle", "origin": {"x": 5.0, "y": 5.0}, "width": 20.0, "height": 10.0}
]"#;

#[test]
fn test_configured_generation_to_file() {
    let dir = TempDir::new().unwrap();
    let config_path = dir.path().join("config.toml");
    std::fs::write(
        &config_path,
        "[generator]\nfeed_rate_cut = 500.0\nunits = \"mm\"\n",
    )
    .unwrap();

    let config = Config::load_or_default(Some(&config_path)).unwrap();
    let settings = generator_settings(&config);
    assert_eq!(settings.units, Units::Millimeters);

    let shapes = parse_shapes(SHAPES).unwrap();
    let program = generate(&shapes, &settings).unwrap();
    assert_eq!(
        &program.instructions()[..4],
        &[
            MotionInstruction::RapidMove { x: 0.0, y: 0.0 },
            MotionInstruction::LaserOn,
            MotionInstruction::LinearMove {
                x: 10.0,
                y: 0.0,
                feed_rate: 500.0
            },
            MotionInstruction::LaserOff,
        ]
    );

    let output = dir.path().join("out.gcode");
    program.write_to(&output).unwrap();
    let text = std::fs::read_to_string(&output).unwrap();
    assert_eq!(text, program.to_gcode());
    assert!(text.lines().any(|l| l == "G1 X10 Y0 F500"));
}
