//! Shared constants for end-to-end tests
//!
//! This module contains all constants used across the test suite.
//! When test data changes (user credentials, catalog IDs, etc.),
//! update only this file.

// ============================================================================
// Test User Credentials
// ============================================================================

/// Regular test user, created by the fixtures
pub const TEST_USER: &str = "testuser";

/// Regular test user password
pub const TEST_PASS: &str = "testpass123";

/// Second test user, used for follow/unfollow tests
pub const OTHER_USER: &str = "otheruser";

/// Second test user password
pub const OTHER_PASS: &str = "otherpass123";

/// User id of `TEST_USER` (registered first)
pub const TEST_USER_ID: i64 = 1;

/// User id of `OTHER_USER` (registered second)
pub const OTHER_USER_ID: i64 = 2;

// ============================================================================
// Test Catalog IDs (assigned in insertion order by the fixtures)
// ============================================================================

/// Country "Sweden"
pub const COUNTRY_1_ID: i64 = 1;

/// Artist "The Test Band" from Sweden
pub const ARTIST_1_ID: i64 = 1;

/// Genre "Pop"
pub const GENRE_1_ID: i64 = 1;

/// Album "First Album" by The Test Band, genre Pop
pub const ALBUM_1_ID: i64 = 1;

/// Song "Opening Track" on First Album
pub const SONG_1_ID: i64 = 1;

/// Song "Closing Track" on First Album
pub const SONG_2_ID: i64 = 2;

/// Standalone song "Loose Single", not on any album
pub const SONG_3_ID: i64 = 3;

// ============================================================================
// Infrastructure
// ============================================================================

/// Timeout for individual HTTP requests
pub const REQUEST_TIMEOUT_SECS: u64 = 10;
