//! One-account-per-identity selection.

use warden_store::AccessRequest;

/// Pick the single request that stays whitelisted for one identity;
/// everything else is secondary and gets revoked.
///
/// A `preferred_name` wins on exact match, first match in input order
/// breaking ties between duplicates of the same name. With no
/// preference the first element wins, which per the store's ordering
/// contract is the most recently decided request.
///
/// Pure function: callers do the I/O.
pub fn select_primary<'a>(
    requests: &'a [AccessRequest],
    preferred_name: Option<&str>,
) -> (Option<&'a AccessRequest>, Vec<&'a AccessRequest>) {
    let Some(first) = requests.first() else {
        return (None, Vec::new());
    };
    let primary = preferred_name
        .and_then(|name| requests.iter().find(|r| r.in_game_name == name))
        .unwrap_or(first);
    let secondaries = requests.iter().filter(|r| r.id != primary.id).collect();
    (Some(primary), secondaries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_store::RequestStatus;

    fn req(id: i64, name: &str) -> AccessRequest {
        AccessRequest {
            id,
            identity: 10,
            origin_channel: 77,
            in_game_name: name.to_string(),
            comment: None,
            status: RequestStatus::Approved,
            created_at: "2026-01-01T00:00:00.000Z".to_string(),
            decided_at: Some("2026-01-02T00:00:00.000Z".to_string()),
            decided_by: Some(1),
        }
    }

    #[test]
    fn empty_input_selects_nothing() {
        let (primary, secondaries) = select_primary(&[], Some("Steve"));
        assert!(primary.is_none());
        assert!(secondaries.is_empty());
    }

    #[test]
    fn preferred_name_wins() {
        let requests = vec![req(1, "Steve"), req(2, "Alt")];
        let (primary, secondaries) = select_primary(&requests, Some("Steve"));
        assert_eq!(primary.unwrap().id, 1);
        let ids: Vec<_> = secondaries.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![2]);
    }

    #[test]
    fn preferred_name_wins_regardless_of_position() {
        let requests = vec![req(1, "Alt"), req(2, "Steve")];
        let (primary, secondaries) = select_primary(&requests, Some("Steve"));
        assert_eq!(primary.unwrap().id, 2);
        let ids: Vec<_> = secondaries.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![1]);
    }

    #[test]
    fn no_preference_takes_first_in_order() {
        let requests = vec![req(1, "Steve"), req(2, "Alt")];
        let (primary, secondaries) = select_primary(&requests, None);
        assert_eq!(primary.unwrap().id, 1);
        assert_eq!(secondaries.len(), 1);
    }

    #[test]
    fn unmatched_preference_falls_back_to_first() {
        let requests = vec![req(1, "Steve"), req(2, "Alt")];
        let (primary, _) = select_primary(&requests, Some("Nobody"));
        assert_eq!(primary.unwrap().id, 1);
    }

    #[test]
    fn duplicate_preferred_names_break_ties_on_first() {
        let requests = vec![req(3, "Steve"), req(4, "Steve"), req(5, "Alt")];
        let (primary, secondaries) = select_primary(&requests, Some("Steve"));
        assert_eq!(primary.unwrap().id, 3);
        let ids: Vec<_> = secondaries.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![4, 5]);
    }
}
