// src/polls.rs
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{is_unique_violation, AppError};
use crate::models::{OptionsInput, Poll, PollOption, PollResults, PollRow, Vote};

pub const MAX_OPTIONS: usize = 10;
pub const MIN_OPTIONS: usize = 2;

/// Trims, drops empties, caps at [`MAX_OPTIONS`]. Insertion order is kept:
/// an option's identity is its position in this list.
pub fn normalize_options(input: &OptionsInput) -> Vec<String> {
    let raw: Vec<&str> = match input {
        OptionsInput::List(items) => items.iter().map(String::as_str).collect(),
        OptionsInput::Text(blob) => blob.split('\n').collect(),
    };
    raw.into_iter()
        .map(str::trim)
        .filter(|o| !o.is_empty())
        .take(MAX_OPTIONS)
        .map(str::to_string)
        .collect()
}

/// Validates a new poll's inputs, returning the normalized option list.
pub fn validate_new_poll(question: &str, options: &OptionsInput) -> Result<Vec<String>, AppError> {
    let opts = normalize_options(options);
    if question.trim().is_empty() || opts.len() < MIN_OPTIONS {
        return Err(AppError::Validation(
            "question and at least 2 options required".into(),
        ));
    }
    Ok(opts)
}

/// True iff the poll has a deadline strictly earlier than `now`.
pub fn is_expired(poll: &Poll, now: DateTime<Utc>) -> bool {
    matches!(poll.expires_at, Some(deadline) if deadline < now)
}

pub async fn create_poll(
    pool: &PgPool,
    created_by: Uuid,
    question: &str,
    options: &OptionsInput,
    expires_at: Option<DateTime<Utc>>,
) -> Result<Poll, AppError> {
    let opts = validate_new_poll(question, options)?;

    let mut tx = pool.begin().await?;

    let row = sqlx::query_as::<_, PollRow>(
        "INSERT INTO polls (id, question, created_by, expires_at) \
         VALUES ($1, $2, $3, $4) \
         RETURNING id, question, created_by, expires_at, created_at",
    )
    .bind(Uuid::new_v4())
    .bind(question.trim())
    .bind(created_by)
    .bind(expires_at)
    .fetch_one(&mut *tx)
    .await?;

    let mut stored = Vec::with_capacity(opts.len());
    for (idx, text) in opts.iter().enumerate() {
        let option = sqlx::query_as::<_, PollOption>(
            "INSERT INTO poll_options (poll_id, idx, text, votes) \
             VALUES ($1, $2, $3, 0) \
             RETURNING poll_id, idx, text, votes",
        )
        .bind(row.id)
        .bind(idx as i32)
        .bind(text)
        .fetch_one(&mut *tx)
        .await?;
        stored.push(option);
    }

    tx.commit().await?;

    tracing::info!(poll_id = %row.id, options = stored.len(), "poll created");
    Ok(Poll::from_parts(row, stored))
}

async fn options_for(pool: &PgPool, poll_id: Uuid) -> Result<Vec<PollOption>, AppError> {
    let options = sqlx::query_as::<_, PollOption>(
        "SELECT poll_id, idx, text, votes FROM poll_options \
         WHERE poll_id = $1 ORDER BY idx ASC",
    )
    .bind(poll_id)
    .fetch_all(pool)
    .await?;
    Ok(options)
}

pub async fn find_poll(pool: &PgPool, id: Uuid) -> Result<Option<Poll>, AppError> {
    let row = sqlx::query_as::<_, PollRow>(
        "SELECT id, question, created_by, expires_at, created_at FROM polls WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(row) => {
            let options = options_for(pool, row.id).await?;
            Ok(Some(Poll::from_parts(row, options)))
        }
        None => Ok(None),
    }
}

pub async fn get_poll(pool: &PgPool, id: Uuid) -> Result<Poll, AppError> {
    find_poll(pool, id)
        .await?
        .ok_or_else(|| AppError::NotFound("poll not found".into()))
}

/// All polls with their options, newest first.
pub async fn list_polls(pool: &PgPool) -> Result<Vec<Poll>, AppError> {
    let rows = sqlx::query_as::<_, PollRow>(
        "SELECT id, question, created_by, expires_at, created_at \
         FROM polls ORDER BY created_at DESC",
    )
    .fetch_all(pool)
    .await?;

    let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
    let all_options = sqlx::query_as::<_, PollOption>(
        "SELECT poll_id, idx, text, votes FROM poll_options \
         WHERE poll_id = ANY($1) ORDER BY idx ASC",
    )
    .bind(ids)
    .fetch_all(pool)
    .await?;

    let polls = rows
        .into_iter()
        .map(|row| {
            let options = all_options
                .iter()
                .filter(|o| o.poll_id == row.id)
                .cloned()
                .collect();
            Poll::from_parts(row, options)
        })
        .collect();
    Ok(polls)
}

pub async fn find_vote(
    pool: &PgPool,
    poll_id: Uuid,
    user_id: Uuid,
) -> Result<Option<Vote>, AppError> {
    let vote = sqlx::query_as::<_, Vote>(
        "SELECT id, poll_id, user_id, option_idx, created_at FROM votes \
         WHERE poll_id = $1 AND user_id = $2",
    )
    .bind(poll_id)
    .bind(user_id)
    .fetch_optional(pool)
    .await?;
    Ok(vote)
}

/// Vote preconditions, checked in order: expiry, then an existing vote, then
/// option bounds. An expired poll wins over any other complaint, and a second
/// vote is reported as a duplicate even when its option index is garbage.
pub fn check_vote(
    poll: &Poll,
    existing: Option<&Vote>,
    option_idx: i32,
    now: DateTime<Utc>,
) -> Result<(), AppError> {
    if is_expired(poll, now) {
        return Err(AppError::Expired);
    }
    if existing.is_some() {
        return Err(AppError::DuplicateVote);
    }
    if option_idx < 0 || option_idx as usize >= poll.options.len() {
        return Err(AppError::Validation("invalid option".into()));
    }
    Ok(())
}

/// Records a vote. The insert and the counter increment commit together; the
/// increment is done server-side, so concurrent casts on the same poll cannot
/// lose updates. The unique index on (poll_id, user_id) is the authoritative
/// double-vote guard; the lookup beforehand only gives the friendly error on
/// the common path.
pub async fn cast_vote(
    pool: &PgPool,
    poll_id: Uuid,
    user_id: Uuid,
    option_idx: i32,
) -> Result<(), AppError> {
    let poll = get_poll(pool, poll_id).await?;
    let existing = find_vote(pool, poll_id, user_id).await?;
    check_vote(&poll, existing.as_ref(), option_idx, Utc::now())?;

    let mut tx = pool.begin().await?;

    let inserted = sqlx::query(
        "INSERT INTO votes (id, poll_id, user_id, option_idx) VALUES ($1, $2, $3, $4)",
    )
    .bind(Uuid::new_v4())
    .bind(poll_id)
    .bind(user_id)
    .bind(option_idx)
    .execute(&mut *tx)
    .await;

    match inserted {
        Ok(_) => {}
        // Race lost between the lookup and the insert.
        Err(err) if is_unique_violation(&err) => return Err(AppError::DuplicateVote),
        Err(err) => return Err(err.into()),
    }

    sqlx::query("UPDATE poll_options SET votes = votes + 1 WHERE poll_id = $1 AND idx = $2")
        .bind(poll_id)
        .bind(option_idx)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    tracing::info!(%poll_id, %user_id, option_idx, "vote recorded");
    Ok(())
}

/// Results with the total computed by summing option counts, never read from
/// a stored field.
pub async fn get_results(pool: &PgPool, poll_id: Uuid) -> Result<PollResults, AppError> {
    let poll = get_poll(pool, poll_id).await?;
    let total_votes = poll.options.iter().map(|o| i64::from(o.votes)).sum();
    Ok(PollResults {
        id: poll.id,
        question: poll.question,
        options: poll.options,
        total_votes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn poll_expiring(expires_at: Option<DateTime<Utc>>) -> Poll {
        Poll {
            id: Uuid::new_v4(),
            question: "X vs Y".into(),
            created_by: Uuid::new_v4(),
            expires_at,
            created_at: Utc::now(),
            options: Vec::new(),
        }
    }

    #[test]
    fn normalize_trims_and_drops_empties() {
        let input = OptionsInput::List(vec![
            "  X  ".into(),
            "".into(),
            "   ".into(),
            "Y".into(),
        ]);
        assert_eq!(normalize_options(&input), vec!["X", "Y"]);
    }

    #[test]
    fn normalize_splits_textarea_blob() {
        let input = OptionsInput::Text("X\n\n  Y  \nZ\n".into());
        assert_eq!(normalize_options(&input), vec!["X", "Y", "Z"]);
    }

    #[test]
    fn normalize_caps_at_ten() {
        let input = OptionsInput::List((0..15).map(|i| format!("opt {i}")).collect());
        assert_eq!(normalize_options(&input).len(), MAX_OPTIONS);
    }

    #[test]
    fn one_option_is_rejected_two_accepted() {
        let one = OptionsInput::List(vec!["only".into(), "   ".into()]);
        assert!(matches!(
            validate_new_poll("q", &one),
            Err(AppError::Validation(_))
        ));

        let two = OptionsInput::List(vec!["X".into(), "Y".into()]);
        assert_eq!(validate_new_poll("q", &two).unwrap(), vec!["X", "Y"]);
    }

    #[test]
    fn empty_question_is_rejected() {
        let opts = OptionsInput::List(vec!["X".into(), "Y".into()]);
        assert!(validate_new_poll("   ", &opts).is_err());
    }

    fn poll_with_options(n: usize, expires_at: Option<DateTime<Utc>>) -> Poll {
        let id = Uuid::new_v4();
        Poll {
            id,
            question: "X vs Y".into(),
            created_by: Uuid::new_v4(),
            expires_at,
            created_at: Utc::now(),
            options: (0..n)
                .map(|idx| crate::models::PollOption {
                    poll_id: id,
                    idx: idx as i32,
                    text: format!("opt {idx}"),
                    votes: 0,
                })
                .collect(),
        }
    }

    fn vote_on(poll: &Poll, option_idx: i32) -> Vote {
        Vote {
            id: Uuid::new_v4(),
            poll_id: poll.id,
            user_id: Uuid::new_v4(),
            option_idx,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn vote_within_bounds_passes() {
        let poll = poll_with_options(2, None);
        let now = Utc::now();
        assert!(check_vote(&poll, None, 0, now).is_ok());
        assert!(check_vote(&poll, None, 1, now).is_ok());
    }

    #[test]
    fn vote_out_of_bounds_is_rejected() {
        let poll = poll_with_options(2, None);
        let now = Utc::now();
        assert!(matches!(
            check_vote(&poll, None, -1, now),
            Err(AppError::Validation(_))
        ));
        // One past the end: option identity is a zero-based index.
        assert!(matches!(
            check_vote(&poll, None, 2, now),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn expired_poll_rejects_even_a_valid_option() {
        let now = Utc::now();
        let poll = poll_with_options(2, Some(now - Duration::seconds(1)));
        assert!(matches!(
            check_vote(&poll, None, 0, now),
            Err(AppError::Expired)
        ));
        // Expiry is checked before bounds.
        assert!(matches!(
            check_vote(&poll, None, 99, now),
            Err(AppError::Expired)
        ));
    }

    #[test]
    fn second_vote_is_a_duplicate_before_bounds_are_looked_at() {
        let poll = poll_with_options(2, None);
        let now = Utc::now();
        let existing = vote_on(&poll, 1);
        assert!(matches!(
            check_vote(&poll, Some(&existing), 0, now),
            Err(AppError::DuplicateVote)
        ));
        assert!(matches!(
            check_vote(&poll, Some(&existing), 99, now),
            Err(AppError::DuplicateVote)
        ));
    }

    #[test]
    fn expiry_is_strictly_before_now() {
        let now = Utc::now();
        assert!(!is_expired(&poll_expiring(None), now));
        assert!(!is_expired(&poll_expiring(Some(now)), now));
        assert!(!is_expired(&poll_expiring(Some(now + Duration::hours(1))), now));
        assert!(is_expired(&poll_expiring(Some(now - Duration::seconds(1))), now));
    }
}
