//! Unit tests for message splitting at safe boundaries.

use agent_relay::render::split::{floor_char_boundary, split_message, split_point};

#[test]
fn short_text_is_a_single_chunk() {
    assert_eq!(split_message("hello", 3000), vec!["hello".to_owned()]);
    assert_eq!(split_message("", 3000), vec![String::new()]);
}

#[test]
fn text_exactly_at_limit_is_not_split() {
    let text = "a".repeat(3000);
    assert_eq!(split_message(&text, 3000), vec![text]);
}

#[test]
fn one_byte_over_limit_cuts_hard() {
    let text = "a".repeat(3001);
    let chunks = split_message(&text, 3000);

    assert_eq!(chunks.len(), 2);
    assert_eq!(chunks[0].len(), 3000);
    assert_eq!(chunks[1], "a");
}

#[test]
fn prefers_last_newline_before_limit() {
    let text = format!("{}\n{}", "a".repeat(2000), "b".repeat(1500));
    let chunks = split_message(&text, 3000);

    assert_eq!(chunks[0], format!("{}\n", "a".repeat(2000)));
    assert_eq!(chunks[1], "b".repeat(1500));
}

#[test]
fn early_newline_still_beats_hard_cut() {
    let text = format!("a\n{}", "b".repeat(3500));
    assert_eq!(split_point(&text, 3000), 2);

    let chunks = split_message(&text, 3000);
    assert_eq!(chunks, vec!["a\n".to_owned(), "b".repeat(3000), "b".repeat(500)]);
}

#[test]
fn never_splits_inside_a_character() {
    let text = "é".repeat(2000);
    let chunks = split_message(&text, 3001);

    assert!(chunks.iter().all(|chunk| chunk.len() <= 3001));
    assert_eq!(chunks.concat(), text);
    assert_eq!(chunks[0].len(), 3000);
}

#[test]
fn long_text_splits_into_bounded_chunks() {
    let text: String = (0..900).map(|i| format!("line {i:04}\n")).collect();
    let chunks = split_message(&text, 3000);

    assert!(chunks.len() >= 3);
    assert!(chunks.iter().all(|chunk| chunk.len() <= 3000));
    assert!(chunks[..chunks.len() - 1].iter().all(|chunk| chunk.ends_with('\n')));
    assert_eq!(chunks.concat(), text);
}

#[test]
fn floor_char_boundary_steps_back_to_boundary() {
    let text = "aé";
    assert_eq!(floor_char_boundary(text, 2), 1);
    assert_eq!(floor_char_boundary(text, 3), 3);
    assert_eq!(floor_char_boundary(text, 10), 3);
}

#[test]
fn split_point_always_makes_progress() {
    let text = "\u{1f600}\u{1f600}";
    assert_eq!(split_point(text, 2), 4);
}
