// Result Normalizer
// Maps backend-specific outputs onto the canonical Detection shape

use crate::models::{ConfidenceLevel, Detection, Prediction, Probabilities};
use crate::services::config_store::CommercialThresholds;
use tracing::warn;

const DEFAULT_AI_THRESHOLD: f64 = 0.5;

/// Confidence band of a probability-of-fake score.
pub fn confidence_level(score: f64, thresholds: &CommercialThresholds) -> ConfidenceLevel {
    if score >= thresholds.high_confidence {
        ConfidenceLevel::High
    } else if score <= thresholds.low_confidence {
        ConfidenceLevel::Low
    } else {
        ConfidenceLevel::Medium
    }
}

/// Classify a probability-of-fake score in [0, 1] against the AI threshold.
///
/// Confidence is the rounded probability of whichever class was predicted, so
/// it always equals the matching entry of `probabilities`.
pub fn classify_score(
    score: f64,
    thresholds: &CommercialThresholds,
    model_used: &str,
    model_author: &str,
) -> Detection {
    let score = score.clamp(0.0, 1.0);
    let prediction = if score >= thresholds.ai_generated {
        Prediction::Fake
    } else {
        Prediction::Real
    };
    let probabilities = Probabilities::from_fake_score(score);

    Detection {
        prediction,
        confidence: probabilities.of(prediction),
        probabilities,
        raw_score: score,
        model_used: model_used.to_string(),
        model_author: model_author.to_string(),
        confidence_level: Some(confidence_level(score, thresholds)),
        threshold_used: Some(thresholds.ai_generated),
        request_id: None,
    }
}

/// Raw fields of an inference-server answer, already pulled out of the JSON.
#[derive(Debug, Clone, Default)]
pub struct InferenceOutput<'a> {
    pub label: &'a str,
    /// Percent confidence of the stated label.
    pub confidence: Option<f64>,
    /// `(real, fake)` in percent; fractions summing to ~1 are accepted too.
    pub probabilities: Option<(f64, f64)>,
}

/// Normalize an inference-server answer.
///
/// With probabilities present they are authoritative: the stated confidence is
/// re-derived from them, and a label that contradicts them is overridden.
/// Without probabilities the stated confidence fills in the complement, and a
/// label stated with under 50% confidence is flipped to the other side.
pub fn normalize_inference(
    output: &InferenceOutput<'_>,
    model_used: &str,
    model_author: &str,
) -> Result<Detection, String> {
    let stated = Prediction::from_label(output.label)
        .ok_or_else(|| format!("unknown prediction label: {:?}", output.label))?;

    let (prediction, probabilities, raw_score) = match output.probabilities {
        Some((real, fake)) => {
            let fake_fraction = fake_fraction(real, fake)?;
            let probabilities = Probabilities::from_fake_score(fake_fraction);
            let implied = if probabilities.fake > probabilities.real {
                Some(Prediction::Fake)
            } else if probabilities.real > probabilities.fake {
                Some(Prediction::Real)
            } else {
                None
            };
            let prediction = match implied {
                Some(implied) if implied != stated => {
                    warn!(
                        "[NORMALIZER] Label {:?} contradicts probabilities real={} fake={}, using {}",
                        output.label, probabilities.real, probabilities.fake, implied
                    );
                    implied
                }
                _ => stated,
            };
            (prediction, probabilities, fake_fraction)
        }
        None => {
            let confidence = output
                .confidence
                .filter(|c| c.is_finite())
                .ok_or_else(|| "response has neither probabilities nor confidence".to_string())?;
            let confidence = confidence.clamp(0.0, 100.0).round() as u32;
            let probabilities = Probabilities::from_stated(stated, confidence);
            let prediction = if confidence < 50 {
                let flipped = match stated {
                    Prediction::Real => Prediction::Fake,
                    Prediction::Fake => Prediction::Real,
                };
                warn!(
                    "[NORMALIZER] Label {:?} stated with {}% confidence, using {}",
                    output.label, confidence, flipped
                );
                flipped
            } else {
                stated
            };
            let raw_score = probabilities.fake as f64 / 100.0;
            (prediction, probabilities, raw_score)
        }
    };

    Ok(Detection {
        prediction,
        confidence: probabilities.of(prediction),
        probabilities,
        raw_score,
        model_used: model_used.to_string(),
        model_author: model_author.to_string(),
        confidence_level: None,
        threshold_used: None,
        request_id: None,
    })
}

fn fake_fraction(real: f64, fake: f64) -> Result<f64, String> {
    if !real.is_finite() || !fake.is_finite() || real < 0.0 || fake < 0.0 {
        return Err(format!("invalid probabilities real={} fake={}", real, fake));
    }
    let total = real + fake;
    if total <= 0.0 {
        return Err("probabilities sum to zero".to_string());
    }
    Ok((fake / total).clamp(0.0, 1.0))
}

/// Checks every invariant a normalized detection must satisfy.
///
/// A verdict made against a non-default AI threshold may sit on the side below
/// 50; every other detection must predict a side holding at least 50.
pub fn check_invariants(detection: &Detection) -> Result<(), String> {
    let p = detection.probabilities;
    if p.real > 100 || p.fake > 100 {
        return Err(format!("probability out of range: {:?}", p));
    }
    if !(99..=101).contains(&p.total()) {
        return Err(format!("probabilities do not sum to 100: {:?}", p));
    }
    if detection.confidence > 100 {
        return Err(format!("confidence out of range: {}", detection.confidence));
    }
    if detection.confidence != p.of(detection.prediction) {
        return Err(format!(
            "confidence {} does not match probability of {} ({})",
            detection.confidence,
            detection.prediction,
            p.of(detection.prediction)
        ));
    }
    if !(0.0..=1.0).contains(&detection.raw_score) {
        return Err(format!("raw score out of range: {}", detection.raw_score));
    }
    let custom_threshold = detection
        .threshold_used
        .is_some_and(|t| (t - DEFAULT_AI_THRESHOLD).abs() > f64::EPSILON);
    if !custom_threshold && p.of(detection.prediction) < 50 {
        return Err(format!(
            "prediction {} is not the side at or above 50: {:?}",
            detection.prediction, p
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn thresholds() -> CommercialThresholds {
        CommercialThresholds::default()
    }

    #[test]
    fn test_classify_high_score() {
        let d = classify_score(0.85, &thresholds(), "m", "a");
        assert_eq!(d.prediction, Prediction::Fake);
        assert_eq!(d.confidence, 85);
        assert_eq!(d.probabilities, Probabilities { real: 15, fake: 85 });
        assert_eq!(d.confidence_level, Some(ConfidenceLevel::High));
        assert_eq!(d.threshold_used, Some(0.5));
    }

    #[test]
    fn test_classify_low_score() {
        let d = classify_score(0.12, &thresholds(), "m", "a");
        assert_eq!(d.prediction, Prediction::Real);
        assert_eq!(d.confidence, 88);
        assert_eq!(d.probabilities, Probabilities { real: 88, fake: 12 });
        assert_eq!(d.confidence_level, Some(ConfidenceLevel::Low));
    }

    #[test]
    fn test_classify_boundary_is_fake() {
        let d = classify_score(0.5, &thresholds(), "m", "a");
        assert_eq!(d.prediction, Prediction::Fake);
        assert_eq!(d.confidence, 50);
        assert_eq!(d.confidence_level, Some(ConfidenceLevel::Medium));
    }

    #[test]
    fn test_classified_scores_hold_invariants() {
        for i in 0..=1000 {
            let score = i as f64 / 1000.0;
            let d = classify_score(score, &thresholds(), "m", "a");
            check_invariants(&d).unwrap();
            assert!(d.probabilities.of(d.prediction) >= 50, "score {}", score);
        }
    }

    #[test]
    fn test_classify_just_below_boundary_is_real() {
        // Both sides round to at least 50 here; the threshold decides.
        let d = classify_score(0.495, &thresholds(), "m", "a");
        assert_eq!(d.prediction, Prediction::Real);
        assert_eq!(d.probabilities, Probabilities { real: 51, fake: 50 });
        assert_eq!(d.confidence, 51);
        check_invariants(&d).unwrap();
    }

    #[test]
    fn test_custom_threshold_verdict_passes_invariants() {
        let strict = CommercialThresholds {
            ai_generated: 0.7,
            ..thresholds()
        };
        let d = classify_score(0.6, &strict, "m", "a");
        assert_eq!(d.prediction, Prediction::Real);
        assert_eq!(d.confidence, 40);
        check_invariants(&d).unwrap();
    }

    #[test]
    fn test_inference_stated_confidence_only() {
        let output = InferenceOutput {
            label: "Real",
            confidence: Some(70.0),
            probabilities: None,
        };
        let d = normalize_inference(&output, "m", "a").unwrap();
        assert_eq!(d.prediction, Prediction::Real);
        assert_eq!(d.confidence, 70);
        assert_eq!(d.probabilities, Probabilities { real: 70, fake: 30 });
        assert!((d.raw_score - 0.3).abs() < 1e-9);
    }

    #[test]
    fn test_inference_low_stated_confidence_flips_label() {
        let output = InferenceOutput {
            label: "Real",
            confidence: Some(30.0),
            probabilities: None,
        };
        let d = normalize_inference(&output, "m", "a").unwrap();
        assert_eq!(d.prediction, Prediction::Fake);
        assert_eq!(d.confidence, 70);
        assert_eq!(d.probabilities, Probabilities { real: 30, fake: 70 });
        assert!((d.raw_score - 0.7).abs() < 1e-9);
        check_invariants(&d).unwrap();

        let even = InferenceOutput {
            label: "Sahte",
            confidence: Some(50.0),
            probabilities: None,
        };
        let d = normalize_inference(&even, "m", "a").unwrap();
        assert_eq!(d.prediction, Prediction::Fake);
        assert_eq!(d.confidence, 50);
    }

    #[test]
    fn test_inference_localized_label_with_probabilities() {
        let output = InferenceOutput {
            label: "Sahte",
            confidence: Some(91.3),
            probabilities: Some((8.7, 91.3)),
        };
        let d = normalize_inference(&output, "m", "a").unwrap();
        assert_eq!(d.prediction, Prediction::Fake);
        assert_eq!(d.confidence, 91);
        assert_eq!(d.probabilities, Probabilities { real: 9, fake: 91 });
        assert!((d.raw_score - 0.913).abs() < 1e-9);
    }

    #[test]
    fn test_inference_confidence_rederived_from_probabilities() {
        // Server reported the fake probability as confidence of a Real verdict.
        let output = InferenceOutput {
            label: "Gerçek",
            confidence: Some(12.0),
            probabilities: Some((88.0, 12.0)),
        };
        let d = normalize_inference(&output, "m", "a").unwrap();
        assert_eq!(d.prediction, Prediction::Real);
        assert_eq!(d.confidence, 88);
    }

    #[test]
    fn test_inference_contradicting_label_follows_probabilities() {
        let output = InferenceOutput {
            label: "Real",
            confidence: Some(80.0),
            probabilities: Some((20.0, 80.0)),
        };
        let d = normalize_inference(&output, "m", "a").unwrap();
        assert_eq!(d.prediction, Prediction::Fake);
        assert_eq!(d.confidence, 80);
        check_invariants(&d).unwrap();
    }

    #[test]
    fn test_inference_fractional_probabilities() {
        let output = InferenceOutput {
            label: "fake",
            confidence: None,
            probabilities: Some((0.25, 0.75)),
        };
        let d = normalize_inference(&output, "m", "a").unwrap();
        assert_eq!(d.probabilities, Probabilities { real: 25, fake: 75 });
        assert_eq!(d.confidence, 75);
    }

    #[test]
    fn test_inference_rejects_unusable_output() {
        let unknown = InferenceOutput {
            label: "maybe",
            confidence: Some(50.0),
            probabilities: None,
        };
        assert!(normalize_inference(&unknown, "m", "a").is_err());

        let empty = InferenceOutput {
            label: "Real",
            confidence: None,
            probabilities: None,
        };
        assert!(normalize_inference(&empty, "m", "a").is_err());

        let zero = InferenceOutput {
            label: "Real",
            confidence: None,
            probabilities: Some((0.0, 0.0)),
        };
        assert!(normalize_inference(&zero, "m", "a").is_err());
    }

    #[test]
    fn test_inference_samples_hold_invariants() {
        let labels = ["Real", "Fake", "Gerçek", "Sahte"];
        for label in labels {
            for c in (0..=100).step_by(7) {
                let stated = InferenceOutput {
                    label,
                    confidence: Some(c as f64 + 0.4),
                    probabilities: None,
                };
                let d = normalize_inference(&stated, "m", "a").unwrap();
                check_invariants(&d).unwrap();
                assert!(d.probabilities.of(d.prediction) >= 50, "{} {}", label, c);

                let fake = c as f64 + 0.37;
                let with_probs = InferenceOutput {
                    label,
                    confidence: None,
                    probabilities: Some((100.0 - fake, fake)),
                };
                let d = normalize_inference(&with_probs, "m", "a").unwrap();
                check_invariants(&d).unwrap();
                assert!(d.probabilities.of(d.prediction) >= 50, "{} {}", label, fake);
            }
        }
    }

    #[test]
    fn test_invariant_violations_detected() {
        let mut d = classify_score(0.7, &thresholds(), "m", "a");
        d.confidence = 30;
        assert!(check_invariants(&d).is_err());

        let mut d = classify_score(0.7, &thresholds(), "m", "a");
        d.probabilities = Probabilities { real: 10, fake: 70 };
        assert!(check_invariants(&d).is_err());

        let mut d = classify_score(0.7, &thresholds(), "m", "a");
        d.prediction = Prediction::Real;
        d.confidence = 30;
        assert!(check_invariants(&d).is_err());
    }
}
