//! Roster import and export
//!
//! A roster row is a logical record, one per team:
//!
//! ```text
//! import:  [team name, member name, member name, ...]   (has_team_name)
//!          [member name, member name, ...]              (generated team name)
//! export:  [team name?, parent name?, members, mentor?, permission granted?]
//! ```
//!
//! Import is a sequence of independent per-row operations over the
//! [`MembershipEngine`]; a failing row (or member) is reported and the rest
//! of the roster is still applied. Export is lazy: [`RosterExport`] holds a
//! snapshot of team IDs and renders rows one at a time as a stream.

use std::sync::Arc;

use futures::stream::{self, Stream, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{EntityRef, MembershipError, MembershipResult};
use crate::hierarchy::TeamHierarchy;
use crate::membership::MembershipEngine;
use crate::models::{MemberRole, Membership, ParentEntity, ParentKind, Team, TeamKind, User};
use crate::store::Datastore;

/// Separator between values that share one export cell
pub const CELL_SEPARATOR: &str = ", ";

/// One roster record
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterRow {
    pub cells: Vec<String>,
}

impl RosterRow {
    pub fn new<I, T>(cells: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self {
            cells: cells.into_iter().map(Into::into).collect(),
        }
    }

    /// True when every cell is blank
    pub fn is_blank(&self) -> bool {
        self.cells.iter().all(|cell| cell.trim().is_empty())
    }
}

/// What to do when an imported team name already exists under the parent
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DuplicateTeamPolicy {
    /// Add the row's members to the existing team
    #[default]
    Merge,

    /// Skip the row
    Ignore,

    /// Create a new team with a suffixed name
    Rename,
}

/// Import settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportOptions {
    /// First cell of each row is the team name
    #[serde(default = "default_has_team_name")]
    pub has_team_name: bool,

    #[serde(default)]
    pub duplicate_policy: DuplicateTeamPolicy,

    /// Enroll users as participants of the parent before adding them
    #[serde(default)]
    pub enroll_missing_participants: bool,
}

fn default_has_team_name() -> bool {
    true
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            has_team_name: default_has_team_name(),
            duplicate_policy: DuplicateTeamPolicy::default(),
            enroll_missing_participants: false,
        }
    }
}

/// A member that could not be added while importing a row
#[derive(Debug)]
pub struct MemberFailure {
    pub user_name: String,
    pub error: MembershipError,
}

/// Outcome of one imported row
#[derive(Debug)]
pub struct RowReport {
    /// 1-based row number
    pub row: usize,

    /// Team the row resolved to, if it got that far
    pub team: Option<Team>,

    /// Whether the team was created by this row
    pub created: bool,

    /// Row skipped by [`DuplicateTeamPolicy::Ignore`]
    pub skipped: bool,

    pub added: Vec<Membership>,

    pub member_failures: Vec<MemberFailure>,

    /// Row-level failure; no member of the row was processed
    pub error: Option<MembershipError>,
}

impl RowReport {
    fn new(row: usize) -> Self {
        Self {
            row,
            team: None,
            created: false,
            skipped: false,
            added: Vec::new(),
            member_failures: Vec::new(),
            error: None,
        }
    }

    fn failed(row: usize, error: MembershipError) -> Self {
        Self {
            error: Some(error),
            ..Self::new(row)
        }
    }

    /// Row applied with no row-level or member-level failure
    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.member_failures.is_empty()
    }
}

/// Outcome of an import
#[derive(Debug, Default)]
pub struct ImportReport {
    pub rows: Vec<RowReport>,
}

impl ImportReport {
    pub fn succeeded(&self) -> impl Iterator<Item = &RowReport> {
        self.rows.iter().filter(|row| row.is_success())
    }

    pub fn failed(&self) -> impl Iterator<Item = &RowReport> {
        self.rows.iter().filter(|row| !row.is_success())
    }

    pub fn members_added(&self) -> usize {
        self.rows.iter().map(|row| row.added.len()).sum()
    }

    pub fn teams_created(&self) -> usize {
        self.rows.iter().filter(|row| row.created).count()
    }
}

/// How a user is rendered in an export cell
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberField {
    /// Login handle
    #[default]
    Name,

    /// Display name, falling back to the login handle
    FullName,

    /// Email, falling back to the login handle
    Email,
}

impl MemberField {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemberField::Name => "name",
            MemberField::FullName => "full_name",
            MemberField::Email => "email",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "name" => Some(MemberField::Name),
            "full_name" => Some(MemberField::FullName),
            "email" => Some(MemberField::Email),
            _ => None,
        }
    }

    fn render(&self, user: &User) -> String {
        let value = match self {
            MemberField::Name => None,
            MemberField::FullName => user.full_name.as_deref(),
            MemberField::Email => user.email.as_deref(),
        };
        value.unwrap_or(&user.name).to_string()
    }
}

/// Export settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportOptions {
    #[serde(default = "default_team_name")]
    pub team_name: bool,

    #[serde(default)]
    pub parent_name: bool,

    #[serde(default)]
    pub member_field: MemberField,

    #[serde(default)]
    pub mentor: bool,

    #[serde(default)]
    pub permission_granted: bool,
}

fn default_team_name() -> bool {
    true
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            team_name: default_team_name(),
            parent_name: false,
            member_field: MemberField::default(),
            mentor: false,
            permission_granted: false,
        }
    }
}

/// One export column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "field", content = "render", rename_all = "snake_case")]
pub enum ExportField {
    TeamName,
    ParentName,
    Members(MemberField),
    Mentor(MemberField),
    PermissionGranted,
}

impl ExportField {
    /// Column header
    pub fn header(&self) -> &'static str {
        match self {
            ExportField::TeamName => "Team Name",
            ExportField::ParentName => "Parent Name",
            ExportField::Members(_) => "Team Members",
            ExportField::Mentor(_) => "Mentor",
            ExportField::PermissionGranted => "Permission Granted",
        }
    }
}

/// Columns produced for `options`, in output order
pub fn export_fields(options: &ExportOptions) -> Vec<ExportField> {
    let mut fields = Vec::with_capacity(5);
    if options.team_name {
        fields.push(ExportField::TeamName);
    }
    if options.parent_name {
        fields.push(ExportField::ParentName);
    }
    fields.push(ExportField::Members(options.member_field));
    if options.mentor {
        fields.push(ExportField::Mentor(options.member_field));
    }
    if options.permission_granted {
        fields.push(ExportField::PermissionGranted);
    }
    fields
}

/// Lazy export of every team under one owner.
///
/// The set of teams is fixed when the export is created. Each call to
/// [`rows`](Self::rows) starts a fresh pass over that set and reads team
/// contents as rows are pulled; teams deleted since the snapshot are skipped.
pub struct RosterExport<S: ?Sized> {
    store: Arc<S>,
    parent: ParentEntity,
    team_ids: Vec<Uuid>,
    fields: Vec<ExportField>,
}

impl<S: Datastore + ?Sized> RosterExport<S> {
    pub fn parent(&self) -> &ParentEntity {
        &self.parent
    }

    pub fn fields(&self) -> &[ExportField] {
        &self.fields
    }

    /// Number of teams in the snapshot
    pub fn len(&self) -> usize {
        self.team_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.team_ids.is_empty()
    }

    /// Header row matching [`fields`](Self::fields)
    pub fn header(&self) -> RosterRow {
        RosterRow::new(self.fields.iter().map(ExportField::header))
    }

    /// Rows, one per team, rendered on demand
    pub fn rows(&self) -> impl Stream<Item = MembershipResult<RosterRow>> + '_ {
        stream::iter(self.team_ids.iter().copied())
            .then(move |team_id| self.render_row(team_id))
            .filter_map(|rendered| futures::future::ready(rendered.transpose()))
    }

    /// Renders every row, stopping at the first error
    pub async fn collect_rows(&self) -> MembershipResult<Vec<RosterRow>> {
        self.rows().try_collect().await
    }

    async fn render_row(&self, team_id: Uuid) -> MembershipResult<Option<RosterRow>> {
        let Some(team) = self.store.find_team(team_id).await? else {
            return Ok(None);
        };

        let mut members = Vec::new();
        let mut mentor = None;
        for membership in self.store.list_memberships(team_id).await? {
            let user = self
                .store
                .find_user(membership.user_id)
                .await?
                .ok_or(MembershipError::NotFound(EntityRef::User(membership.user_id)))?;
            match membership.role {
                MemberRole::Member => members.push(user),
                MemberRole::Mentor => mentor = Some(user),
            }
        }

        let mut cells = Vec::with_capacity(self.fields.len());
        for field in &self.fields {
            let cell = match field {
                ExportField::TeamName => team.name.clone(),
                ExportField::ParentName => self.parent.name().to_string(),
                ExportField::Members(render) => join(members.iter().map(|user| render.render(user))),
                ExportField::Mentor(render) => mentor
                    .as_ref()
                    .map(|user| render.render(user))
                    .unwrap_or_default(),
                ExportField::PermissionGranted => {
                    let mut flags = Vec::with_capacity(members.len());
                    for user in &members {
                        let granted = self
                            .store
                            .find_participant_link(user.id, team.parent_id, team.parent_kind)
                            .await?
                            .map_or(false, |link| link.permission_granted);
                        flags.push(granted.to_string());
                    }
                    join(flags.into_iter())
                }
            };
            cells.push(cell);
        }

        Ok(Some(RosterRow { cells }))
    }
}

fn join(values: impl Iterator<Item = String>) -> String {
    values.collect::<Vec<_>>().join(CELL_SEPARATOR)
}

/// Bulk roster operations
pub struct RosterTransfer<S: ?Sized> {
    engine: MembershipEngine<S>,
    hierarchy: TeamHierarchy<S>,
}

impl<S: Datastore + ?Sized> RosterTransfer<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            engine: MembershipEngine::new(Arc::clone(&store)),
            hierarchy: TeamHierarchy::new(store),
        }
    }

    /// Imports `rows` as teams under the given owner.
    ///
    /// Only an unknown owner fails the whole call; everything else is
    /// reported per row in the [`ImportReport`].
    pub async fn import(
        &self,
        rows: &[RosterRow],
        parent_id: Uuid,
        parent_kind: ParentKind,
        options: &ImportOptions,
    ) -> MembershipResult<ImportReport> {
        let parent = self.hierarchy.find_parent(parent_id, parent_kind).await?;
        let kind = TeamKind::for_parent(&parent);

        let mut report = ImportReport::default();
        for (index, row) in rows.iter().enumerate() {
            let row_report = self.import_row(index + 1, row, &parent, kind, options).await;
            if let Some(err) = &row_report.error {
                warn!(row = row_report.row, code = err.code(), error = %err, "Roster row rejected");
            }
            report.rows.push(row_report);
        }

        info!(
            parent_id = %parent_id,
            rows = report.rows.len(),
            failed = report.failed().count(),
            teams_created = report.teams_created(),
            members_added = report.members_added(),
            "Roster import finished"
        );
        Ok(report)
    }

    async fn import_row(
        &self,
        row_number: usize,
        row: &RosterRow,
        parent: &ParentEntity,
        kind: TeamKind,
        options: &ImportOptions,
    ) -> RowReport {
        if row.is_blank() {
            return RowReport::failed(
                row_number,
                MembershipError::InvalidRow {
                    row: row_number,
                    reason: "row is empty".to_string(),
                },
            );
        }

        let (team_name, member_cells) = if options.has_team_name {
            let name = row.cells[0].trim();
            if name.is_empty() {
                return RowReport::failed(
                    row_number,
                    MembershipError::InvalidRow {
                        row: row_number,
                        reason: "team name is blank".to_string(),
                    },
                );
            }
            (Some(name), &row.cells[1..])
        } else {
            (None, &row.cells[..])
        };

        let mut report = RowReport::new(row_number);
        match self.resolve_team(parent, kind, team_name, options).await {
            Ok(Some((team, created))) => {
                report.team = Some(team);
                report.created = created;
            }
            Ok(None) => {
                report.skipped = true;
                return report;
            }
            Err(error) => {
                report.error = Some(error);
                return report;
            }
        }

        let Some(team_id) = report.team.as_ref().map(|team| team.id) else {
            return report;
        };
        for user_name in member_cells.iter().map(|cell| cell.trim()).filter(|cell| !cell.is_empty()) {
            match self.import_member(team_id, parent, user_name, options).await {
                Ok(membership) => report.added.push(membership),
                Err(error) => {
                    warn!(
                        row = row_number,
                        user_name,
                        code = error.code(),
                        "Roster member not added"
                    );
                    report.member_failures.push(MemberFailure {
                        user_name: user_name.to_string(),
                        error,
                    });
                }
            }
        }

        report
    }

    /// Team for a row and whether it was created; `None` means skip the row
    async fn resolve_team(
        &self,
        parent: &ParentEntity,
        kind: TeamKind,
        name: Option<&str>,
        options: &ImportOptions,
    ) -> MembershipResult<Option<(Team, bool)>> {
        let Some(name) = name else {
            let team = self.hierarchy.create_team_under(parent, kind, None).await?;
            return Ok(Some((team, true)));
        };

        let existing = self
            .engine
            .store()
            .find_team_by_name(parent.id(), name)
            .await?;
        let Some(existing) = existing else {
            let team = self.hierarchy.create_team_under(parent, kind, Some(name)).await?;
            return Ok(Some((team, true)));
        };

        match options.duplicate_policy {
            DuplicateTeamPolicy::Merge => Ok(Some((existing, false))),
            DuplicateTeamPolicy::Ignore => Ok(None),
            DuplicateTeamPolicy::Rename => {
                let name = self.hierarchy.unique_team_name(parent.id(), name).await?;
                let team = self.hierarchy.create_team_under(parent, kind, Some(&name)).await?;
                Ok(Some((team, true)))
            }
        }
    }

    async fn import_member(
        &self,
        team_id: Uuid,
        parent: &ParentEntity,
        user_name: &str,
        options: &ImportOptions,
    ) -> MembershipResult<Membership> {
        let store = self.engine.store();
        let user = store
            .find_user_by_name(user_name)
            .await?
            .ok_or_else(|| MembershipError::NotFound(EntityRef::UserName(user_name.to_string())))?;

        if options.enroll_missing_participants {
            store
                .find_or_create_participant(&user, parent.id(), parent.kind())
                .await?;
        }

        self.engine.add_member(team_id, user.id).await
    }

    /// Prepares a lazy export of every team under the owner
    pub async fn export(
        &self,
        parent_id: Uuid,
        parent_kind: ParentKind,
        options: &ExportOptions,
    ) -> MembershipResult<RosterExport<S>> {
        let parent = self.hierarchy.find_parent(parent_id, parent_kind).await?;
        let team_ids = self
            .hierarchy
            .teams_under(parent_id)
            .await?
            .into_iter()
            .map(|team| team.id)
            .collect();

        Ok(RosterExport {
            store: Arc::clone(self.engine.store()),
            parent,
            team_ids,
            fields: export_fields(options),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_export_fields_default() {
        let fields = export_fields(&ExportOptions::default());
        assert_eq!(
            fields,
            vec![ExportField::TeamName, ExportField::Members(MemberField::Name)]
        );
    }

    #[test]
    fn test_export_fields_order() {
        let options = ExportOptions {
            team_name: true,
            parent_name: true,
            member_field: MemberField::Email,
            mentor: true,
            permission_granted: true,
        };
        assert_eq!(
            export_fields(&options),
            vec![
                ExportField::TeamName,
                ExportField::ParentName,
                ExportField::Members(MemberField::Email),
                ExportField::Mentor(MemberField::Email),
                ExportField::PermissionGranted,
            ]
        );
    }

    #[test]
    fn test_export_fields_members_only() {
        let options = ExportOptions {
            team_name: false,
            ..ExportOptions::default()
        };
        assert_eq!(
            export_fields(&options),
            vec![ExportField::Members(MemberField::Name)]
        );
    }

    #[test]
    fn test_member_field_render_falls_back_to_name() {
        let user = User {
            id: Uuid::new_v4(),
            name: "student1".to_string(),
            full_name: Some("Student One".to_string()),
            email: None,
            master_permission_granted: false,
            created_at: chrono::Utc::now(),
        };
        assert_eq!(MemberField::Name.render(&user), "student1");
        assert_eq!(MemberField::FullName.render(&user), "Student One");
        assert_eq!(MemberField::Email.render(&user), "student1");
    }

    #[test]
    fn test_member_field_parse() {
        assert_eq!(MemberField::from_str("email"), Some(MemberField::Email));
        assert_eq!(MemberField::from_str("full_name"), Some(MemberField::FullName));
        assert_eq!(MemberField::from_str("login"), None);
        assert_eq!(MemberField::FullName.as_str(), "full_name");
    }

    #[test]
    fn test_import_options_from_json_defaults() {
        let options: ImportOptions = serde_json::from_str("{}").unwrap();
        assert!(options.has_team_name);
        assert_eq!(options.duplicate_policy, DuplicateTeamPolicy::Merge);
        assert!(!options.enroll_missing_participants);

        let options: ImportOptions =
            serde_json::from_str(r#"{"duplicate_policy": "rename", "has_team_name": false}"#)
                .unwrap();
        assert_eq!(options.duplicate_policy, DuplicateTeamPolicy::Rename);
        assert!(!options.has_team_name);
    }

    #[test]
    fn test_roster_row_blank() {
        assert!(RosterRow::new(["", "  "]).is_blank());
        assert!(RosterRow::default().is_blank());
        assert!(!RosterRow::new(["Team A"]).is_blank());
    }
}
