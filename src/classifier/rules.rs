/// Live observation rules
///
/// Person count rules are mutually exclusive; object rules fire
/// independently of each other and of the person count.
use super::detector::Detection;
use crate::ledger::Violation;

pub const PERSON_LABEL: &str = "person";
pub const PHONE_LABELS: &[&str] = &["cell phone", "mobile phone"];
pub const BOOK_LABEL: &str = "book";
pub const LAPTOP_LABEL: &str = "laptop";

fn confident<'a>(detections: &'a [Detection], floor: f32) -> impl Iterator<Item = &'a Detection> {
    detections.iter().filter(move |d| d.confidence >= floor)
}

pub fn person_count(detections: &[Detection], floor: f32) -> usize {
    confident(detections, floor)
        .filter(|d| d.label == PERSON_LABEL)
        .count()
}

fn any_label(detections: &[Detection], floor: f32, labels: &[&str]) -> bool {
    confident(detections, floor).any(|d| labels.contains(&d.label.as_str()))
}

/// Image rules in evaluation order
pub fn image_violations(detections: &[Detection], floor: f32) -> Vec<Violation> {
    let mut violations = Vec::new();

    match person_count(detections, floor) {
        0 => violations.push(Violation::no_face()),
        1 => {}
        n => violations.push(Violation::multiple_persons(n)),
    }
    if any_label(detections, floor, PHONE_LABELS) {
        violations.push(Violation::phone());
    }
    if any_label(detections, floor, &[BOOK_LABEL]) {
        violations.push(Violation::book());
    }
    if any_label(detections, floor, &[LAPTOP_LABEL]) {
        violations.push(Violation::laptop());
    }

    violations
}

/// Audio strictly above the threshold raises one event
pub fn audio_violation(level: Option<f64>, threshold: f64) -> Option<Violation> {
    level
        .filter(|level| *level > threshold)
        .map(Violation::audio)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::Category;

    fn categories(violations: &[Violation]) -> Vec<Category> {
        violations.iter().map(|v| v.category).collect()
    }

    #[test]
    fn test_empty_frame_is_no_face() {
        assert_eq!(categories(&image_violations(&[], 0.4)), vec![Category::NoFace]);
    }

    #[test]
    fn test_single_person_is_clean() {
        let detections = vec![Detection::new("person", 0.9), Detection::new("chair", 0.8)];
        assert!(image_violations(&detections, 0.4).is_empty());
    }

    #[test]
    fn test_person_rules_are_exclusive() {
        let detections = vec![
            Detection::new("person", 0.9),
            Detection::new("person", 0.7),
            Detection::new("person", 0.6),
        ];
        let violations = image_violations(&detections, 0.4);
        assert_eq!(categories(&violations), vec![Category::MultiplePersons]);
        assert_eq!(violations[0].detail, "Multiple Persons (3)");
    }

    #[test]
    fn test_low_confidence_person_does_not_count() {
        let detections = vec![Detection::new("person", 0.9), Detection::new("person", 0.2)];
        assert!(image_violations(&detections, 0.4).is_empty());
    }

    #[test]
    fn test_object_rules_are_independent() {
        let detections = vec![
            Detection::new("person", 0.9),
            Detection::new("mobile phone", 0.6),
            Detection::new("cell phone", 0.5),
            Detection::new("book", 0.5),
            Detection::new("laptop", 0.45),
        ];
        assert_eq!(
            categories(&image_violations(&detections, 0.4)),
            vec![Category::Phone, Category::Book, Category::Laptop]
        );
    }

    #[test]
    fn test_objects_fire_alongside_no_face() {
        let detections = vec![Detection::new("book", 0.8)];
        assert_eq!(
            categories(&image_violations(&detections, 0.4)),
            vec![Category::NoFace, Category::Book]
        );
    }

    #[test]
    fn test_audio_threshold_is_strict() {
        assert!(audio_violation(Some(50.0), 50.0).is_none());
        assert!(audio_violation(None, 50.0).is_none());
        let loud = audio_violation(Some(50.5), 50.0).unwrap();
        assert_eq!(loud.category, Category::Audio);
        assert_eq!(loud.weight, 1);
    }
}
