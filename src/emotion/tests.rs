use super::*;
use crate::error::DecodeError;
use std::time::Duration;
use uuid::Uuid;

#[test]
fn test_reading_wire_format() {
    let session_id = Uuid::new_v4();
    let reading = EmotionReading::new(session_id, Stage::Confirmed, "Happiness", 87)
        .with_heart_rate(Some(72));

    let json: serde_json::Value = serde_json::from_slice(&reading.to_payload().unwrap()).unwrap();

    assert_eq!(json["sessionid"], session_id.to_string());
    assert_eq!(json["stage"], 1);
    assert_eq!(json["emotion"], "Happiness");
    assert_eq!(json["score"], 87);
    assert_eq!(json["heartrate"], 72);
    assert_eq!(json["userpresent"], true);
    assert!(json["date"].is_string());
}

#[test]
fn test_heart_rate_accepts_numeric_strings() {
    let session_id = Uuid::new_v4();
    let payload = format!(
        r#"{{"sessionid":"{}","stage":0,"emotion":"Sadness","score":40,"heartrate":" 95 "}}"#,
        session_id
    );

    let reading = EmotionReading::from_payload(payload.as_bytes()).unwrap();

    assert_eq!(reading.stage, Stage::Detected);
    assert_eq!(reading.heartrate, Some(95));
    assert!(reading.user_present);
}

#[test]
fn test_heart_rate_absent_or_garbage_is_none() {
    let session_id = Uuid::new_v4();
    for heartrate in [r#""""#, r#""fast""#, "null", "-3", "[1]"] {
        let payload = format!(
            r#"{{"sessionid":"{}","stage":1,"heartrate":{}}}"#,
            session_id, heartrate
        );
        let reading = EmotionReading::from_payload(payload.as_bytes()).unwrap();
        assert_eq!(reading.heartrate, None, "heartrate {}", heartrate);
    }

    let payload = format!(r#"{{"sessionid":"{}","stage":2}}"#, session_id);
    let reading = EmotionReading::from_payload(payload.as_bytes()).unwrap();
    assert_eq!(reading.heartrate, None);
    assert_eq!(reading.stage, Stage::Gone);
}

#[test]
fn test_unknown_stage_is_rejected() {
    let payload = format!(r#"{{"sessionid":"{}","stage":7}}"#, Uuid::new_v4());
    match EmotionReading::from_payload(payload.as_bytes()) {
        Err(DecodeError::Malformed { details }) => assert!(details.contains("7")),
        other => panic!("Expected Malformed, got {:?}", other),
    }
    assert_eq!(Stage::try_from(3), Err(DecodeError::UnknownStage(3)));
}

#[test]
fn test_invalid_utf8_payload() {
    assert_eq!(
        EmotionReading::from_payload(&[0xff, 0xfe]),
        Err(DecodeError::InvalidUtf8)
    );
}

#[test]
fn test_gone_reading_wants_no_lights() {
    let reading = EmotionReading::gone(Uuid::new_v4());
    assert!(!reading.user_present);
    assert!(!reading.wants_lights());

    let mut reading = EmotionReading::new(Uuid::new_v4(), Stage::Detected, "Neutral", 50);
    assert!(reading.wants_lights());
    reading.user_present = false;
    assert!(!reading.wants_lights());
}

#[test]
fn test_decode_inbound_kinds() {
    assert_eq!(decode_inbound(br#"{"lightState":"On"}"#), Ok(Inbound::LightsOn));
    assert_eq!(decode_inbound(br#"{"command":"reset"}"#), Ok(Inbound::Reset));
    assert_eq!(decode_inbound(br#"{"command":"RESET"}"#), Ok(Inbound::Reset));
    assert!(matches!(
        decode_inbound(br#"{"command":"dance"}"#),
        Ok(Inbound::Unrecognized(_))
    ));

    let payload = format!(r#"{{"sessionid":"{}","stage":0}}"#, Uuid::new_v4());
    assert!(matches!(
        decode_inbound(payload.as_bytes()),
        Ok(Inbound::Reading(_))
    ));
}

#[test]
fn test_decode_inbound_rejects_garbage() {
    assert!(matches!(
        decode_inbound(b"not json"),
        Err(DecodeError::Malformed { .. })
    ));
    assert!(matches!(
        decode_inbound(b"[1,2,3]"),
        Err(DecodeError::Malformed { .. })
    ));
    assert!(matches!(
        decode_inbound(br#"{"stage":"soon"}"#),
        Err(DecodeError::Malformed { .. })
    ));
}

#[test]
fn test_notice_payloads() {
    assert_eq!(
        serde_json::to_string(&LightStateNotice::on()).unwrap(),
        r#"{"lightState":"On"}"#
    );
    assert_eq!(
        serde_json::to_string(&ResetCommand::new()).unwrap(),
        r#"{"command":"reset"}"#
    );
}

fn face(width: u32, height: u32, scores: EmotionScores) -> FaceScores {
    FaceScores {
        face_rectangle: FaceRectangle {
            left: 0,
            top: 0,
            width,
            height,
        },
        scores,
    }
}

#[test]
fn test_nearest_face_wins() {
    let far = face(
        20,
        20,
        EmotionScores {
            anger: 0.9,
            ..Default::default()
        },
    );
    let near = face(
        80,
        90,
        EmotionScores {
            happiness: 0.634,
            neutral: 0.3,
            ..Default::default()
        },
    );

    let result = select_nearest_face(&[far, near]).unwrap();
    assert_eq!(result.emotion, "Happiness");
    assert_eq!(result.score, 63);
}

#[test]
fn test_score_ties_prefer_earlier_category() {
    let scores = EmotionScores {
        fear: 0.5,
        sadness: 0.5,
        ..Default::default()
    };
    assert_eq!(scores.top().0, "Fear");
    assert!(select_nearest_face(&[]).is_none());
}

#[test]
fn test_parse_classifier_output_variants() {
    let faces = r#"[
        {"faceRectangle":{"left":1,"top":2,"width":10,"height":10},"scores":{"sadness":0.8}},
        {"faceRectangle":{"width":50,"height":60},"scores":{"surprise":0.71,"neutral":0.2}}
    ]"#;
    let result = parse_classifier_output(faces).unwrap().unwrap();
    assert_eq!(result.emotion, "Surprise");
    assert_eq!(result.score, 71);

    let direct = r#"{"emotion":"Anger","score":55,"heartrate":101}"#;
    let result = parse_classifier_output(direct).unwrap().unwrap();
    assert_eq!(result.emotion, "Anger");
    assert_eq!(result.heart_rate, Some(101));

    assert_eq!(parse_classifier_output("[]").unwrap(), None);
    assert_eq!(parse_classifier_output("  \n").unwrap(), None);
    assert!(parse_classifier_output("42").is_err());
}

#[tokio::test]
async fn test_fixed_inference() {
    let inference = FixedInference::new("Neutral", 100);
    let result = inference.capture_and_infer().await.unwrap();
    assert_eq!(result.emotion, "Neutral");
    assert_eq!(result.score, 100);
}

#[cfg(unix)]
#[tokio::test]
async fn test_command_inference_reads_stdout() {
    let inference = CommandInference::new(
        "sh",
        vec![
            "-c".to_string(),
            r#"echo '{"emotion":"Happiness","score":90}'"#.to_string(),
        ],
        Duration::from_secs(5),
    );
    let result = inference.capture_and_infer().await.unwrap();
    assert_eq!(result.emotion, "Happiness");
    assert_eq!(result.score, 90);
}

#[cfg(unix)]
#[tokio::test]
async fn test_command_inference_failures_yield_none() {
    let failing = CommandInference::new(
        "sh",
        vec!["-c".to_string(), "exit 3".to_string()],
        Duration::from_secs(5),
    );
    assert!(failing.capture_and_infer().await.is_none());

    let slow = CommandInference::new(
        "sh",
        vec!["-c".to_string(), "sleep 5".to_string()],
        Duration::from_millis(50),
    );
    assert!(slow.capture_and_infer().await.is_none());

    let missing = CommandInference::new(
        "/nonexistent/classifier",
        Vec::new(),
        Duration::from_secs(1),
    );
    assert!(missing.capture_and_infer().await.is_none());
}
