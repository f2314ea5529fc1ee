use lodestar_core::chunk_text;
use proptest::prelude::*;

proptest! {
    #[test]
    fn chunks_reassemble_to_source(text in "\\PC{0,400}", max_len in 1usize..64) {
        let chunks = chunk_text(&text, max_len);
        let joined: String = chunks.iter().map(|c| c.text.as_str()).collect();
        prop_assert_eq!(&joined, &text);
        let total = text.chars().count();
        let mut cursor = 0usize;
        for chunk in &chunks {
            prop_assert!(chunk.text.chars().count() <= max_len);
            prop_assert!(!chunk.text.is_empty());
            prop_assert_eq!(chunk.span.start, cursor);
            prop_assert!(chunk.span.end <= total);
            cursor = chunk.span.end;
        }
        prop_assert_eq!(cursor, total);
    }

    #[test]
    fn chunking_is_deterministic(text in "[a-z ]{0,200}", max_len in 1usize..32) {
        prop_assert_eq!(chunk_text(&text, max_len), chunk_text(&text, max_len));
    }
}
