// tests/repository_tests.rs

use idlebot_common::models::{AccountRecord, GameEntry, Settings};
use idlebot_core::db::Database;
use idlebot_core::repositories::{AccountRepository, SqliteAccountRepository};
use idlebot_core::test_utils::setup_test_repository;
use idlebot_core::Error;
use tokio_test::{assert_err, assert_ok};

fn record(username: &str) -> AccountRecord {
    AccountRecord::new(username, format!("sealed-{}", username), vec![GameEntry::Id(730), "440".into()])
}

#[tokio::test]
async fn create_get_and_list() -> Result<(), Error> {
    let repo = setup_test_repository().await?;
    repo.create(&record("zed")).await?;
    repo.create(&record("amy")).await?;

    let amy = repo.get("amy").await?.expect("amy stored");
    assert_eq!(amy.secret, "sealed-amy");
    assert_eq!(amy.game_list, vec![GameEntry::Id(730), GameEntry::Raw("440".into())]);
    assert_eq!(amy.settings, Settings::default());
    assert!(amy.sentry.is_none());

    let names: Vec<String> = repo.list().await?.into_iter().map(|r| r.username).collect();
    assert_eq!(names, vec!["amy", "zed"]);

    assert!(repo.get("nobody").await?.is_none());
    Ok(())
}

#[tokio::test]
async fn duplicate_username_is_rejected() -> Result<(), Error> {
    let repo = setup_test_repository().await?;
    assert_ok!(repo.create(&record("amy")).await);
    let err = assert_err!(repo.create(&record("amy")).await);
    assert!(matches!(err, Error::AlreadyExists(_)), "{:?}", err);
    Ok(())
}

#[tokio::test]
async fn settings_and_game_list_are_replaced_together() -> Result<(), Error> {
    let repo = setup_test_repository().await?;
    repo.create(&record("amy")).await?;

    let settings = Settings {
        shared_secret: Some("MTIzNDU2Nzg5MDEyMzQ1Njc4OTA=".into()),
        custom_activity_title: Some("Studying".into()),
        appear_offline: true,
        auto_accept_relations: true,
    };
    let games = vec![GameEntry::from("abc"), GameEntry::Id(-5), GameEntry::Id(570)];
    repo.update_settings("amy", &settings, &games).await?;

    let amy = repo.get("amy").await?.expect("amy stored");
    assert_eq!(amy.settings, settings);
    assert_eq!(amy.game_list, games);
    assert_eq!(amy.secret, "sealed-amy");

    let err = assert_err!(repo.update_settings("nobody", &settings, &games).await);
    assert!(matches!(err, Error::NotFound(_)));
    Ok(())
}

#[tokio::test]
async fn sentry_is_overwritten_in_place() -> Result<(), Error> {
    let repo = setup_test_repository().await?;
    repo.create(&record("amy")).await?;

    repo.update_sentry("amy", "AQID").await?;
    repo.update_sentry("amy", "BAUG").await?;
    assert_eq!(repo.get("amy").await?.and_then(|r| r.sentry).as_deref(), Some("BAUG"));

    assert!(matches!(repo.update_sentry("nobody", "AQID").await, Err(Error::NotFound(_))));
    Ok(())
}

#[tokio::test]
async fn delete_removes_the_row() -> Result<(), Error> {
    let repo = setup_test_repository().await?;
    repo.create(&record("amy")).await?;
    repo.delete("amy").await?;
    assert!(repo.get("amy").await?.is_none());
    // Deleting twice is harmless.
    assert_ok!(repo.delete("amy").await);
    Ok(())
}

#[tokio::test]
async fn file_database_survives_reopen() -> Result<(), Error> {
    let dir = std::env::temp_dir().join(format!("idlebot-repo-test-{}", std::process::id()));
    let path = dir.join("accounts.db");
    let path_str = path.to_string_lossy().to_string();

    {
        let db = Database::new(&path_str).await?;
        db.migrate().await?;
        SqliteAccountRepository::new(db.pool().clone()).create(&record("amy")).await?;
        db.pool().close().await;
    }

    let db = Database::new(&path_str).await?;
    db.migrate().await?;
    let repo = SqliteAccountRepository::new(db.pool().clone());
    assert!(repo.get("amy").await?.is_some());
    db.pool().close().await;

    let _ = std::fs::remove_dir_all(&dir);
    Ok(())
}
