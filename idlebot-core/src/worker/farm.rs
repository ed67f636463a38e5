// File: idlebot-core/src/worker/farm.rs
//
// Presence and activity assertion. Runs on every login and on every
// heartbeat tick; the remote side may drop activity silently, so the worker
// simply re-pushes the whole list.

use tracing::{debug, warn};

use idlebot_common::models::{GameEntry, Settings};
use crate::platforms::{Activity, PresenceState, RemoteConnection};
use crate::worker::WorkerContext;
use crate::Error;

/// The activity list to push for the given configuration.
///
/// A custom title replaces the game list entirely. Otherwise every entry that
/// parses as a strictly positive app id is kept, in order; the rest are
/// skipped without error.
pub fn desired_activities(game_list: &[GameEntry], settings: &Settings) -> Vec<Activity> {
    let custom_title = settings
        .custom_activity_title
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty());

    if let Some(title) = custom_title {
        return vec![Activity::Custom(title.to_string())];
    }

    game_list
        .iter()
        .filter_map(GameEntry::app_id)
        .map(Activity::Game)
        .collect()
}

pub fn desired_presence(settings: &Settings) -> PresenceState {
    if settings.appear_offline {
        PresenceState::Invisible
    } else {
        PresenceState::Online
    }
}

/// Sets presence, then the activity list (possibly empty).
pub async fn assert_activity(conn: &dyn RemoteConnection, ctx: &WorkerContext) -> Result<(), Error> {
    let presence = desired_presence(&ctx.settings);
    let activities = desired_activities(&ctx.game_list, &ctx.settings);

    conn.set_presence(presence).await?;
    conn.set_activities(&activities).await?;
    debug!("[Farm] presence={:?}, {} activities pushed", presence, activities.len());
    Ok(())
}

/// `assert_activity` for the heartbeat path: failures are logged and left for
/// the next tick.
pub async fn farm(conn: &dyn RemoteConnection, ctx: &WorkerContext) {
    if let Err(e) = assert_activity(conn, ctx).await {
        warn!("[Farm] could not assert activity: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platforms::MockRemoteConnection;
    use idlebot_common::models::WorkerSeed;
    use mockall::Sequence;

    fn ctx(game_list: Vec<GameEntry>, settings: Settings) -> WorkerContext {
        WorkerContext::from(WorkerSeed {
            username: "alice".into(),
            password: "pw".into(),
            game_list,
            settings,
            tuning: Default::default(),
        })
    }

    #[test]
    fn custom_title_wins_over_games() {
        let settings = Settings {
            custom_activity_title: Some("Idling".into()),
            ..Default::default()
        };
        let list = vec![GameEntry::Id(730)];
        assert_eq!(
            desired_activities(&list, &settings),
            vec![Activity::Custom("Idling".into())]
        );
    }

    #[test]
    fn blank_custom_title_falls_back_to_games() {
        let settings = Settings {
            custom_activity_title: Some("   ".into()),
            ..Default::default()
        };
        let list = vec![GameEntry::from("440")];
        assert_eq!(desired_activities(&list, &settings), vec![Activity::Game(440)]);
    }

    #[test]
    fn invalid_entries_are_skipped_in_order() {
        let list = vec![
            GameEntry::from("730"),
            GameEntry::from("abc"),
            GameEntry::Id(-1),
            GameEntry::from("0"),
            GameEntry::Id(440),
        ];
        assert_eq!(
            desired_activities(&list, &Settings::default()),
            vec![Activity::Game(730), Activity::Game(440)]
        );
    }

    #[tokio::test]
    async fn presence_goes_out_before_activities() {
        let mut conn = MockRemoteConnection::new();
        let mut seq = Sequence::new();
        conn.expect_set_presence()
            .withf(|p| *p == PresenceState::Invisible)
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        conn.expect_set_activities()
            .withf(|a| a.is_empty())
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));

        let settings = Settings { appear_offline: true, ..Default::default() };
        let ctx = ctx(vec![GameEntry::from("nope")], settings);
        assert_activity(&conn, &ctx).await.unwrap();
    }

    #[tokio::test]
    async fn farm_swallows_failures() {
        let mut conn = MockRemoteConnection::new();
        conn.expect_set_presence()
            .returning(|_| Err(Error::Platform("not connected".into())));
        conn.expect_set_activities().times(0);

        farm(&conn, &ctx(vec![GameEntry::Id(730)], Settings::default())).await;
    }
}
