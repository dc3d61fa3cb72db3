// Test module organization
pub mod test_end_to_end;
pub mod test_invariants;
