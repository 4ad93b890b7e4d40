use std::str::FromStr;
use uuid::Uuid;

use crate::protocol::{RoomInfo, UserProfile};
use crate::state::{RegistryError, RoomRegistry};

/// Role of an attached session within its room
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Host,
    Follower,
    Pending,
}

/// How non-host join requests are admitted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JoinPolicy {
    /// Requesters become active immediately
    #[default]
    Auto,
    /// Requesters wait for an explicit host accept/reject decision
    Gated,
}

impl FromStr for JoinPolicy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "auto" => Ok(JoinPolicy::Auto),
            "gated" => Ok(JoinPolicy::Gated),
            other => Err(format!("unknown join policy '{}'", other)),
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum MembershipError {
    #[error("room not found")]
    RoomNotFound,
    #[error("only the host may perform this operation")]
    NotHost,
    #[error("no pending join request for this user")]
    NoSuchRequest,
}

/// Resolution of a join-room request
#[derive(Debug)]
pub enum JoinOutcome {
    /// Requester went straight to active; carries the room snapshot
    Active { info: RoomInfo, role: Role },
    /// Requester is parked awaiting the host's decision; `host_conn` is the
    /// connection to notify, or None when the host is not attached or was
    /// already notified for this user
    Parked { host_conn: Option<Uuid> },
    NotFound,
}

/// Drive a join request through the membership state machine:
/// REQUESTING -> ACTIVE for the room's creator and for anyone under the auto
/// policy, REQUESTING -> PENDING under the gated policy, and a terminal
/// not-found short-circuit when the room id does not resolve.
pub fn resolve_join(
    registry: &RoomRegistry,
    policy: JoinPolicy,
    room_id: &str,
    conn_id: Uuid,
    profile: UserProfile,
) -> JoinOutcome {
    if registry.room_info(room_id).is_none() {
        return JoinOutcome::NotFound;
    }

    if registry.is_host(room_id, &profile.user_id) {
        // The creator attaching their own connection needs no approval.
        return match registry.attach_host(room_id, conn_id) {
            Ok(info) => JoinOutcome::Active {
                info,
                role: Role::Host,
            },
            Err(_) => JoinOutcome::NotFound,
        };
    }

    match policy {
        JoinPolicy::Auto => match registry.add_participant(room_id, conn_id, profile) {
            Ok(info) => JoinOutcome::Active {
                info,
                role: Role::Follower,
            },
            Err(_) => JoinOutcome::NotFound,
        },
        JoinPolicy::Gated => match registry.push_pending(room_id, conn_id, profile) {
            Ok(host_conn) => JoinOutcome::Parked { host_conn },
            // Re-sent request while already pending: keep the requester
            // parked without notifying the host again.
            Err(RegistryError::DuplicateRequest) => JoinOutcome::Parked { host_conn: None },
            Err(_) => JoinOutcome::NotFound,
        },
    }
}

/// The single authority check consulted by every privileged operation
/// (accept/reject decisions and the authoritative state push).
pub fn ensure_host(
    registry: &RoomRegistry,
    room_id: &str,
    actor: &UserProfile,
) -> Result<(), MembershipError> {
    if registry.room_info(room_id).is_none() {
        return Err(MembershipError::RoomNotFound);
    }
    if registry.is_host(room_id, &actor.user_id) {
        Ok(())
    } else {
        Err(MembershipError::NotHost)
    }
}

/// Host accepted: PENDING -> ACTIVE. Returns the requester's connection and
/// the room snapshot their player cold-starts from.
pub fn accept(
    registry: &RoomRegistry,
    room_id: &str,
    actor: &UserProfile,
    target_user_id: &str,
) -> Result<(Uuid, RoomInfo), MembershipError> {
    ensure_host(registry, room_id, actor)?;
    let request = registry
        .take_pending(room_id, target_user_id)
        .map_err(registry_error)?;
    let info = registry
        .add_participant(room_id, request.conn_id, request.profile)
        .map_err(registry_error)?;
    Ok((request.conn_id, info))
}

/// Host rejected: PENDING -> REJECTED (terminal). Returns the requester's
/// connection so it can be notified; the session is detached and may
/// re-request later as a fresh join.
pub fn reject(
    registry: &RoomRegistry,
    room_id: &str,
    actor: &UserProfile,
    target_user_id: &str,
) -> Result<Uuid, MembershipError> {
    ensure_host(registry, room_id, actor)?;
    let request = registry
        .take_pending(room_id, target_user_id)
        .map_err(registry_error)?;
    registry.unbind_session(request.conn_id);
    Ok(request.conn_id)
}

fn registry_error(err: RegistryError) -> MembershipError {
    match err {
        RegistryError::RoomNotFound => MembershipError::RoomNotFound,
        RegistryError::NoSuchRequest => MembershipError::NoSuchRequest,
        other => {
            tracing::warn!("unexpected registry error during membership change: {other}");
            MembershipError::NoSuchRequest
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::StreamingService;

    fn profile(id: &str) -> UserProfile {
        UserProfile {
            user_id: id.to_string(),
            user_name: format!("{} name", id),
            user_photo: None,
        }
    }

    fn room_with_host(registry: &RoomRegistry) -> (String, Uuid) {
        let room_id = registry
            .create_room(
                "movie night".to_string(),
                StreamingService::Youtube,
                "https://www.youtube.com/watch?v=dQw4w9WgXcQ".to_string(),
                profile("host"),
            )
            .unwrap();
        let host_conn = Uuid::new_v4();
        registry.add_session(host_conn);
        registry.attach_host(&room_id, host_conn).unwrap();
        (room_id, host_conn)
    }

    #[test]
    fn test_join_policy_parsing() {
        assert_eq!("auto".parse::<JoinPolicy>().unwrap(), JoinPolicy::Auto);
        assert_eq!("Gated".parse::<JoinPolicy>().unwrap(), JoinPolicy::Gated);
        assert!("open".parse::<JoinPolicy>().is_err());
    }

    #[test]
    fn test_creator_attaches_without_approval_even_when_gated() {
        let registry = RoomRegistry::new();
        let room_id = registry
            .create_room(
                "movie night".to_string(),
                StreamingService::Youtube,
                "https://youtu.be/dQw4w9WgXcQ".to_string(),
                profile("host"),
            )
            .unwrap();
        let conn = Uuid::new_v4();
        registry.add_session(conn);

        let outcome = resolve_join(&registry, JoinPolicy::Gated, &room_id, conn, profile("host"));
        match outcome {
            JoinOutcome::Active { role, .. } => assert_eq!(role, Role::Host),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[test]
    fn test_auto_policy_joins_immediately() {
        let registry = RoomRegistry::new();
        let (room_id, _) = room_with_host(&registry);
        let conn = Uuid::new_v4();
        registry.add_session(conn);

        let outcome = resolve_join(&registry, JoinPolicy::Auto, &room_id, conn, profile("guest"));
        match outcome {
            JoinOutcome::Active { info, role } => {
                assert_eq!(role, Role::Follower);
                assert_eq!(info.host_id, "host");
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(
            registry.session(conn).unwrap().role,
            Some(Role::Follower)
        );
    }

    #[test]
    fn test_gated_policy_parks_the_requester() {
        let registry = RoomRegistry::new();
        let (room_id, host_conn) = room_with_host(&registry);
        let conn = Uuid::new_v4();
        registry.add_session(conn);

        let outcome = resolve_join(&registry, JoinPolicy::Gated, &room_id, conn, profile("guest"));
        match outcome {
            JoinOutcome::Parked { host_conn: notify } => assert_eq!(notify, Some(host_conn)),
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(registry.session(conn).unwrap().role, Some(Role::Pending));

        // Re-sent request stays parked without re-notifying the host
        let outcome = resolve_join(&registry, JoinPolicy::Gated, &room_id, conn, profile("guest"));
        match outcome {
            JoinOutcome::Parked { host_conn: notify } => assert_eq!(notify, None),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_room_short_circuits() {
        let registry = RoomRegistry::new();
        let conn = Uuid::new_v4();
        registry.add_session(conn);
        let outcome = resolve_join(&registry, JoinPolicy::Auto, "zzzzzz", conn, profile("guest"));
        assert!(matches!(outcome, JoinOutcome::NotFound));
    }

    #[test]
    fn test_accept_promotes_pending_to_active() {
        let registry = RoomRegistry::new();
        let (room_id, _) = room_with_host(&registry);
        let conn = Uuid::new_v4();
        registry.add_session(conn);
        resolve_join(&registry, JoinPolicy::Gated, &room_id, conn, profile("guest"));

        let (requester, info) = accept(&registry, &room_id, &profile("host"), "guest").unwrap();
        assert_eq!(requester, conn);
        assert_eq!(info.room_name, "movie night");
        assert_eq!(registry.session(conn).unwrap().role, Some(Role::Follower));
    }

    #[test]
    fn test_reject_detaches_the_requester() {
        let registry = RoomRegistry::new();
        let (room_id, _) = room_with_host(&registry);
        let conn = Uuid::new_v4();
        registry.add_session(conn);
        resolve_join(&registry, JoinPolicy::Gated, &room_id, conn, profile("guest"));

        let requester = reject(&registry, &room_id, &profile("host"), "guest").unwrap();
        assert_eq!(requester, conn);
        let session = registry.session(conn).unwrap();
        assert_eq!(session.room_id, None);
        assert_eq!(session.role, None);

        // Terminal state: deciding again finds nothing pending
        assert_eq!(
            reject(&registry, &room_id, &profile("host"), "guest").unwrap_err(),
            MembershipError::NoSuchRequest
        );
    }

    #[test]
    fn test_only_the_host_may_decide() {
        let registry = RoomRegistry::new();
        let (room_id, _) = room_with_host(&registry);
        let conn = Uuid::new_v4();
        registry.add_session(conn);
        resolve_join(&registry, JoinPolicy::Gated, &room_id, conn, profile("guest"));

        assert_eq!(
            accept(&registry, &room_id, &profile("impostor"), "guest").unwrap_err(),
            MembershipError::NotHost
        );
        assert_eq!(
            ensure_host(&registry, &room_id, &profile("host")),
            Ok(())
        );
        assert_eq!(
            ensure_host(&registry, "zzzzzz", &profile("host")).unwrap_err(),
            MembershipError::RoomNotFound
        );
    }
}
