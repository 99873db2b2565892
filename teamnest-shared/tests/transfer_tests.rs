/// Integration tests for roster import and export
///
/// Run with: cargo test --test transfer_tests

mod common;

use common::TestContext;
use futures::StreamExt;
use teamnest_shared::error::{EntityRef, MembershipError};
use teamnest_shared::models::{CreateUser, ParentKind, TeamKind};
use teamnest_shared::store::{EntityRegistry, TeamStore};
use teamnest_shared::transfer::{
    DuplicateTeamPolicy, ExportOptions, ImportOptions, MemberField, RosterRow,
};
use uuid::Uuid;

#[tokio::test]
async fn test_import_continues_past_bad_row() -> anyhow::Result<()> {
    let ctx = TestContext::new();
    let assignment = ctx.assignment(None, "Project 1", 3, false).await?;
    ctx.participant("student1", assignment.id, ParentKind::Assignment).await?;
    ctx.user("student2").await?; // exists but not enrolled
    ctx.participant("student3", assignment.id, ParentKind::Assignment).await?;

    let rows = vec![
        RosterRow::new(["Alpha", "student1"]),
        RosterRow::new(["Beta", "student2"]),
        RosterRow::new(["Gamma", "student3"]),
    ];
    let report = ctx
        .transfer
        .import(&rows, assignment.id, ParentKind::Assignment, &ImportOptions::default())
        .await?;

    assert_eq!(report.rows.len(), 3);
    assert!(report.rows[0].is_success());
    assert!(report.rows[2].is_success());
    assert_eq!(report.members_added(), 2);

    let bad = &report.rows[1];
    assert_eq!(bad.row, 2);
    assert_eq!(bad.member_failures.len(), 1);
    assert_eq!(bad.member_failures[0].user_name, "student2");
    assert!(matches!(
        bad.member_failures[0].error,
        MembershipError::NotAParticipant { .. }
    ));
    assert_eq!(report.failed().count(), 1);
    assert_eq!(report.succeeded().count(), 2);
    Ok(())
}

#[tokio::test]
async fn test_import_invalid_rows() -> anyhow::Result<()> {
    let ctx = TestContext::new();
    let assignment = ctx.assignment(None, "Project 1", 3, false).await?;
    ctx.participant("student1", assignment.id, ParentKind::Assignment).await?;

    let rows = vec![
        RosterRow::default(),
        RosterRow::new(["  ", "student1"]),
        RosterRow::new(["Alpha", "student1", "ghost"]),
    ];
    let report = ctx
        .transfer
        .import(&rows, assignment.id, ParentKind::Assignment, &ImportOptions::default())
        .await?;

    assert!(matches!(
        report.rows[0].error,
        Some(MembershipError::InvalidRow { row: 1, .. })
    ));
    assert!(matches!(
        report.rows[1].error,
        Some(MembershipError::InvalidRow { row: 2, .. })
    ));

    let alpha = &report.rows[2];
    assert!(alpha.error.is_none());
    assert!(alpha.created);
    assert_eq!(alpha.added.len(), 1);
    assert!(matches!(
        alpha.member_failures[0].error,
        MembershipError::NotFound(EntityRef::UserName(ref name)) if name == "ghost"
    ));
    Ok(())
}

#[tokio::test]
async fn test_import_generates_team_names() -> anyhow::Result<()> {
    let ctx = TestContext::new();
    let course = ctx.course("CSC 517", None).await?;
    ctx.participant("student1", course.id, ParentKind::Course).await?;
    ctx.participant("student2", course.id, ParentKind::Course).await?;

    let options = ImportOptions {
        has_team_name: false,
        ..ImportOptions::default()
    };
    let rows = vec![RosterRow::new(["student1"]), RosterRow::new(["student2"])];
    let report = ctx
        .transfer
        .import(&rows, course.id, ParentKind::Course, &options)
        .await?;

    assert_eq!(report.teams_created(), 2);
    let teams = ctx.hierarchy.teams_under(course.id).await?;
    let names: Vec<&str> = teams.iter().map(|team| team.name.as_str()).collect();
    assert_eq!(names, vec!["CSC 517 Team 1", "CSC 517 Team 2"]);
    assert!(teams.iter().all(|team| team.kind == TeamKind::CourseTeam));
    Ok(())
}

#[tokio::test]
async fn test_import_duplicate_policies() -> anyhow::Result<()> {
    let ctx = TestContext::new();
    let assignment = ctx.assignment(None, "Project 1", 5, false).await?;
    let existing = ctx.team(assignment.id, TeamKind::AssignmentTeam, "Alpha").await?;
    ctx.participant("student1", assignment.id, ParentKind::Assignment).await?;
    ctx.participant("student2", assignment.id, ParentKind::Assignment).await?;
    ctx.participant("student3", assignment.id, ParentKind::Assignment).await?;

    let merge = ctx
        .transfer
        .import(
            &[RosterRow::new(["Alpha", "student1"])],
            assignment.id,
            ParentKind::Assignment,
            &ImportOptions::default(),
        )
        .await?;
    assert!(!merge.rows[0].created);
    assert_eq!(merge.rows[0].team.as_ref().map(|t| t.id), Some(existing.id));
    assert_eq!(ctx.engine.members(existing.id).await?.len(), 1);

    let ignore = ctx
        .transfer
        .import(
            &[RosterRow::new(["Alpha", "student2"])],
            assignment.id,
            ParentKind::Assignment,
            &ImportOptions {
                duplicate_policy: DuplicateTeamPolicy::Ignore,
                ..ImportOptions::default()
            },
        )
        .await?;
    assert!(ignore.rows[0].skipped);
    assert!(ignore.rows[0].added.is_empty());
    assert_eq!(ctx.engine.members(existing.id).await?.len(), 1);

    let rename = ctx
        .transfer
        .import(
            &[RosterRow::new(["Alpha", "student3"])],
            assignment.id,
            ParentKind::Assignment,
            &ImportOptions {
                duplicate_policy: DuplicateTeamPolicy::Rename,
                ..ImportOptions::default()
            },
        )
        .await?;
    let renamed = rename.rows[0].team.as_ref().expect("team");
    assert_eq!(renamed.name, "Alpha (2)");
    assert!(rename.rows[0].created);
    assert_eq!(ctx.engine.members(renamed.id).await?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_import_enrolls_missing_participants() -> anyhow::Result<()> {
    let ctx = TestContext::new();
    let course = ctx.course("CSC 517", Some(3)).await?;
    let mut data = CreateUser::named("student1");
    data.master_permission_granted = true;
    let user = ctx.store.create_user(data).await?;

    let options = ImportOptions {
        enroll_missing_participants: true,
        ..ImportOptions::default()
    };
    let report = ctx
        .transfer
        .import(
            &[RosterRow::new(["Alpha", "student1"])],
            course.id,
            ParentKind::Course,
            &options,
        )
        .await?;
    assert!(report.rows[0].is_success());

    let link = ctx
        .store
        .find_participant_link(user.id, course.id, ParentKind::Course)
        .await?
        .expect("participant link");
    assert!(link.permission_granted);
    Ok(())
}

#[tokio::test]
async fn test_import_unknown_parent() -> anyhow::Result<()> {
    let ctx = TestContext::new();
    let missing = Uuid::new_v4();
    let err = ctx
        .transfer
        .import(&[], missing, ParentKind::Assignment, &ImportOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, MembershipError::NotFound(EntityRef::Assignment(id)) if id == missing));
    Ok(())
}

#[tokio::test]
async fn test_export_rows() -> anyhow::Result<()> {
    let ctx = TestContext::new();
    let assignment = ctx.assignment(None, "Project 1", 3, true).await?;
    let team = ctx.team(assignment.id, TeamKind::MentoredTeam, "Alpha").await?;
    ctx.team(assignment.id, TeamKind::MentoredTeam, "Beta").await?;

    // student1 granted permission account-wide; enrolling copies it onto the link.
    let granted = ctx
        .store
        .create_user(CreateUser {
            email: Some("student1@example.edu".to_string()),
            master_permission_granted: true,
            ..CreateUser::named("student1")
        })
        .await?;
    let link = ctx.enroll(&granted, assignment.id, ParentKind::Assignment).await?;
    assert!(link.permission_granted);
    ctx.engine.add_member(team.id, granted.id).await?;

    let student2 = ctx.participant("student2", assignment.id, ParentKind::Assignment).await?;
    ctx.engine.add_member(team.id, student2.id).await?;
    let mentor = ctx.participant("ta1", assignment.id, ParentKind::Assignment).await?;
    ctx.engine.assign_mentor(team.id, mentor.id).await?;

    let options = ExportOptions {
        team_name: true,
        parent_name: true,
        member_field: MemberField::Email,
        mentor: true,
        permission_granted: true,
    };
    let export = ctx
        .transfer
        .export(assignment.id, ParentKind::Assignment, &options)
        .await?;
    assert_eq!(export.len(), 2);
    assert_eq!(
        export.header(),
        RosterRow::new([
            "Team Name",
            "Parent Name",
            "Team Members",
            "Mentor",
            "Permission Granted"
        ])
    );

    let rows = export.collect_rows().await?;
    assert_eq!(
        rows[0],
        RosterRow::new([
            "Alpha",
            "Project 1",
            "student1@example.edu, student2@example.edu",
            "ta1@example.edu",
            "true, false",
        ])
    );
    assert_eq!(rows[1], RosterRow::new(["Beta", "Project 1", "", "", ""]));
    Ok(())
}

#[tokio::test]
async fn test_export_is_lazy_and_restartable() -> anyhow::Result<()> {
    let ctx = TestContext::new();
    let course = ctx.course("CSC 517", None).await?;
    let alpha = ctx.team(course.id, TeamKind::CourseTeam, "Alpha").await?;
    let beta = ctx.team(course.id, TeamKind::CourseTeam, "Beta").await?;
    let user = ctx.participant("student1", course.id, ParentKind::Course).await?;

    let export = ctx
        .transfer
        .export(course.id, ParentKind::Course, &ExportOptions::default())
        .await?;

    // Contents are read when rows are pulled, not when the export is built.
    ctx.engine.add_member(alpha.id, user.id).await?;

    let mut rows = Box::pin(export.rows());
    let first = rows.next().await.expect("first row")?;
    assert_eq!(first, RosterRow::new(["Alpha", "student1"]));
    drop(rows);

    // Teams removed after the snapshot are skipped on the next pass.
    ctx.hierarchy.delete_team(beta.id).await?;
    let again = export.collect_rows().await?;
    assert_eq!(again, vec![RosterRow::new(["Alpha", "student1"])]);

    // New teams are not part of the snapshot.
    ctx.team(course.id, TeamKind::CourseTeam, "Gamma").await?;
    assert_eq!(export.rows().count().await, 1);
    assert_eq!(ctx.store.list_teams(course.id).await?.len(), 2);
    Ok(())
}
