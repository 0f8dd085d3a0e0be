//! Two-stage threshold policy: per-pair detection, then gallery-wide ratio.

use crate::types::{PairScore, Thresholds, VerificationResult};

/// Reduces a score list to a verdict. Pure: no I/O, no state.
#[derive(Debug, Clone, Copy, Default)]
pub struct VerificationEngine {
    thresholds: Thresholds,
}

impl VerificationEngine {
    pub fn new(thresholds: Thresholds) -> Self {
        Self { thresholds }
    }

    /// Apply both thresholds.
    ///
    /// `gallery_size` is the number of entries present when the scan started,
    /// including any that failed to load, so unreadable references make the
    /// verdict harder to reach. An empty gallery yields ratio 0 and no match.
    pub fn decide(&self, scores: &[PairScore], gallery_size: usize) -> VerificationResult {
        let detections = scores
            .iter()
            .filter(|s| s.value >= self.thresholds.detection)
            .count();

        // Never smaller than the scored set, so the ratio stays within [0, 1].
        let denominator = gallery_size.max(scores.len());
        let ratio = if denominator == 0 {
            0.0
        } else {
            detections as f32 / denominator as f32
        };
        let verified = denominator > 0 && ratio >= self.thresholds.verification;

        VerificationResult {
            scores: scores.to_vec(),
            detections,
            gallery_size: denominator,
            ratio,
            verified,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scores(values: &[f32]) -> Vec<PairScore> {
        values
            .iter()
            .enumerate()
            .map(|(i, &value)| PairScore {
                reference: format!("ref_{i}.jpg"),
                value,
            })
            .collect()
    }

    fn engine(detection: f32, verification: f32) -> VerificationEngine {
        VerificationEngine::new(Thresholds {
            detection,
            verification,
        })
    }

    #[test]
    fn test_partial_match_rejected() {
        let s = scores(&[0.9, 0.8, 0.75, 0.2, 0.1]);
        let result = engine(0.7, 0.7).decide(&s, s.len());
        assert_eq!(result.detections, 3);
        assert!((result.ratio - 0.6).abs() < 1e-6);
        assert!(!result.verified);
    }

    #[test]
    fn test_full_match_accepted() {
        let s = scores(&[0.9, 0.85, 0.8, 0.75, 0.72]);
        let result = engine(0.7, 0.7).decide(&s, s.len());
        assert_eq!(result.detections, 5);
        assert!((result.ratio - 1.0).abs() < 1e-6);
        assert!(result.verified);
    }

    #[test]
    fn test_empty_gallery_unverified() {
        let result = VerificationEngine::default().decide(&[], 0);
        assert_eq!(result.detections, 0);
        assert_eq!(result.gallery_size, 0);
        assert_eq!(result.ratio, 0.0);
        assert!(!result.verified);
    }

    #[test]
    fn test_empty_gallery_unverified_even_with_zero_threshold() {
        let result = engine(0.0, 0.0).decide(&[], 0);
        assert!(!result.verified);
    }

    #[test]
    fn test_score_equal_to_threshold_counts() {
        let s = scores(&[0.7]);
        let result = engine(0.7, 1.0).decide(&s, 1);
        assert_eq!(result.detections, 1);
        assert!(result.verified);
    }

    #[test]
    fn test_failed_entries_count_in_denominator() {
        // Four strong matches, but the gallery held six entries: two unreadable.
        let s = scores(&[0.95, 0.9, 0.9, 0.85]);
        let result = engine(0.7, 0.7).decide(&s, 6);
        assert_eq!(result.detections, 4);
        assert_eq!(result.gallery_size, 6);
        assert!((result.ratio - 4.0 / 6.0).abs() < 1e-6);
        assert!(!result.verified);
    }

    #[test]
    fn test_denominator_not_below_score_count() {
        let s = scores(&[0.9, 0.9, 0.9]);
        let result = engine(0.7, 0.7).decide(&s, 1);
        assert_eq!(result.gallery_size, 3);
        assert!((result.ratio - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_nan_never_detected() {
        let s = scores(&[f32::NAN, 0.9]);
        let result = engine(0.7, 0.5).decide(&s, 2);
        assert_eq!(result.detections, 1);
        assert!(result.verified);
    }

    #[test]
    fn test_unbounded_scores_compared_as_is() {
        let s = scores(&[3.5, -1.0]);
        let result = engine(0.7, 0.5).decide(&s, 2);
        assert_eq!(result.detections, 1);
        assert!(result.verified);
    }

    #[test]
    fn test_decide_is_pure() {
        let s = scores(&[0.1, 0.71, 0.69, 0.99, 0.5, 0.7]);
        let e = engine(0.7, 0.5);
        let first = e.decide(&s, 7);
        for _ in 0..10 {
            assert_eq!(e.decide(&s, 7), first);
        }
        assert_eq!(first.scores, s);
    }

    #[test]
    fn test_raising_detection_threshold_never_adds_detections() {
        let s = scores(&[0.05, 0.3, 0.5, 0.69, 0.7, 0.71, 0.8, 0.95, 1.0]);
        let mut previous = usize::MAX;
        for step in 0..=20 {
            let threshold = step as f32 * 0.05;
            let count = engine(threshold, 0.7).decide(&s, s.len()).detections;
            assert!(count <= previous, "threshold {threshold}: {count} > {previous}");
            previous = count;
        }
    }

    #[test]
    fn test_raising_verification_threshold_never_flips_reject() {
        let s = scores(&[0.9, 0.8, 0.75, 0.2, 0.1]);
        let mut rejected = false;
        for step in 0..=20 {
            let threshold = step as f32 * 0.05;
            let verified = engine(0.7, threshold).decide(&s, s.len()).verified;
            if rejected {
                assert!(!verified, "verification threshold {threshold} flipped a reject");
            }
            rejected |= !verified;
        }
        assert!(rejected);
    }
}
