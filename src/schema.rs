#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Uuid,
    Text,
    TextArray,
    UuidArray,
    Boolean,
    SmallInt,
    Integer,
    BigInt,
    Double,
    Date,
    Timestamp,
    Json,
}

impl ColumnType {
    pub fn sql_type(&self) -> &'static str {
        match self {
            ColumnType::Uuid => "UUID",
            ColumnType::Text => "TEXT",
            ColumnType::TextArray => "TEXT[]",
            ColumnType::UuidArray => "UUID[]",
            ColumnType::Boolean => "BOOLEAN",
            ColumnType::SmallInt => "SMALLINT",
            ColumnType::Integer => "INTEGER",
            ColumnType::BigInt => "BIGINT",
            ColumnType::Double => "DOUBLE PRECISION",
            ColumnType::Date => "DATE",
            ColumnType::Timestamp => "TIMESTAMPTZ",
            ColumnType::Json => "JSONB",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Column {
    pub name: &'static str,
    pub kind: ColumnType,
    pub nullable: bool,
}

const fn col(name: &'static str, kind: ColumnType) -> Column {
    Column {
        name,
        kind,
        nullable: false,
    }
}

const fn nullable(name: &'static str, kind: ColumnType) -> Column {
    Column {
        name,
        kind,
        nullable: true,
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TableSchema {
    pub schema: &'static str,
    pub name: &'static str,
    /// Conflict target for upserts
    pub key: &'static [&'static str],
    pub columns: &'static [Column],
}

impl TableSchema {
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }

    pub fn column_list(&self) -> String {
        self.columns
            .iter()
            .map(|c| c.name)
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn placeholders(&self) -> String {
        (1..=self.columns.len())
            .map(|i| format!("${i}"))
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn insert_sql(&self) -> String {
        format!(
            "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT ({}) DO NOTHING",
            self.qualified_name(),
            self.column_list(),
            self.placeholders(),
            self.key.join(", ")
        )
    }

    pub fn upsert_sql(&self) -> String {
        let updates = self
            .columns
            .iter()
            .filter(|c| !self.key.contains(&c.name))
            .map(|c| format!("{0} = EXCLUDED.{0}", c.name))
            .collect::<Vec<_>>()
            .join(", ");

        format!(
            "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT ({}) DO UPDATE SET {}",
            self.qualified_name(),
            self.column_list(),
            self.placeholders(),
            self.key.join(", "),
            updates
        )
    }

    pub fn select_sql(&self, alias: Option<&str>) -> String {
        match alias {
            Some(alias) => format!(
                "SELECT {} FROM {} {alias}",
                self.columns
                    .iter()
                    .map(|c| format!("{alias}.{}", c.name))
                    .collect::<Vec<_>>()
                    .join(", "),
                self.qualified_name()
            ),
            None => format!("SELECT {} FROM {}", self.column_list(), self.qualified_name()),
        }
    }

    pub fn create_table_sql(&self) -> String {
        let mut lines: Vec<String> = self
            .columns
            .iter()
            .map(|c| {
                format!(
                    "    {} {}{}",
                    c.name,
                    c.kind.sql_type(),
                    if c.nullable { "" } else { " NOT NULL" }
                )
            })
            .collect();
        lines.push(format!("    PRIMARY KEY ({})", self.key.join(", ")));

        format!(
            "CREATE TABLE IF NOT EXISTS {} (\n{}\n)",
            self.qualified_name(),
            lines.join(",\n")
        )
    }
}

pub const SCHEMA: &str = "volunteer_analytics";

pub const VOLUNTEERS: TableSchema = TableSchema {
    schema: SCHEMA,
    name: "volunteers",
    key: &["email"],
    columns: &[
        col("email", ColumnType::Text),
        col("full_name", ColumnType::Text),
        nullable("membership_id", ColumnType::Text),
    ],
};

pub const EVENTS: TableSchema = TableSchema {
    schema: SCHEMA,
    name: "events",
    key: &["id"],
    columns: &[
        col("id", ColumnType::Uuid),
        col("title", ColumnType::Text),
        col("event_type", ColumnType::Text),
        col("status", ColumnType::Text),
        col("duration_start", ColumnType::Date),
        col("duration_end", ColumnType::Date),
    ],
};

pub const REQUIREMENTS: TableSchema = TableSchema {
    schema: SCHEMA,
    name: "requirements",
    key: &["id"],
    columns: &[
        col("id", ColumnType::Uuid),
        col("event_id", ColumnType::Uuid),
        col("volunteer_email", ColumnType::Text),
        col("accepted", ColumnType::Boolean),
    ],
};

pub const EVALUATIONS: TableSchema = TableSchema {
    schema: SCHEMA,
    name: "evaluations",
    key: &["id"],
    columns: &[
        col("id", ColumnType::Uuid),
        col("requirement_id", ColumnType::Uuid),
        nullable("criteria", ColumnType::Json),
        col("finalized", ColumnType::Boolean),
        nullable("comment", ColumnType::Text),
        nullable("recommendations", ColumnType::Text),
    ],
};

pub const SURVEYS: TableSchema = TableSchema {
    schema: SCHEMA,
    name: "satisfaction_surveys",
    key: &["id"],
    columns: &[
        col("id", ColumnType::Uuid),
        col("event_id", ColumnType::Uuid),
        col("respondent", ColumnType::Text),
        col("rating", ColumnType::Double),
        col("issues", ColumnType::TextArray),
        col("submitted_at", ColumnType::Timestamp),
    ],
};

pub const PARTICIPATION_HISTORY: TableSchema = TableSchema {
    schema: SCHEMA,
    name: "volunteer_participation_history",
    key: &["volunteer_email", "semester_year", "semester_number"],
    columns: &[
        col("volunteer_email", ColumnType::Text),
        col("volunteer_name", ColumnType::Text),
        nullable("membership_id", ColumnType::Text),
        col("semester_year", ColumnType::Integer),
        col("semester_number", ColumnType::SmallInt),
        col("events_joined", ColumnType::BigInt),
        col("events_attended", ColumnType::BigInt),
        col("events_dropped", ColumnType::BigInt),
        col("attendance_rate", ColumnType::Double),
        nullable("first_event_date", ColumnType::Date),
        nullable("last_event_date", ColumnType::Date),
        col("days_active_in_semester", ColumnType::BigInt),
        col("participation_consistency", ColumnType::Double),
        col("risk_score", ColumnType::Double),
        col("inactivity_days", ColumnType::BigInt),
        col("engagement_level", ColumnType::Text),
        col("calculated_at", ColumnType::Timestamp),
        col("last_updated", ColumnType::Timestamp),
    ],
};

pub const SEMESTER_SATISFACTION: TableSchema = TableSchema {
    schema: SCHEMA,
    name: "semester_satisfaction",
    key: &["year", "semester"],
    columns: &[
        col("year", ColumnType::Integer),
        col("semester", ColumnType::SmallInt),
        col("overall", ColumnType::Double),
        col("volunteers", ColumnType::Double),
        col("beneficiaries", ColumnType::Double),
        col("total_evaluations", ColumnType::BigInt),
        col("event_ids", ColumnType::UuidArray),
        col("top_issues", ColumnType::TextArray),
        col("updated_at", ColumnType::Timestamp),
    ],
};

pub const ALL_TABLES: [TableSchema; 7] = [
    VOLUNTEERS,
    EVENTS,
    REQUIREMENTS,
    EVALUATIONS,
    SURVEYS,
    PARTICIPATION_HISTORY,
    SEMESTER_SATISFACTION,
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upsert_updates_only_non_key_columns() {
        let sql = SEMESTER_SATISFACTION.upsert_sql();
        assert!(sql.starts_with(
            "INSERT INTO volunteer_analytics.semester_satisfaction (year, semester, overall,"
        ));
        assert!(sql.contains("VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)"));
        assert!(sql.contains("ON CONFLICT (year, semester) DO UPDATE SET overall = EXCLUDED.overall"));
        assert!(!sql.contains("year = EXCLUDED.year"));
        assert!(sql.ends_with("updated_at = EXCLUDED.updated_at"));
    }

    #[test]
    fn history_key_is_volunteer_and_semester() {
        let sql = PARTICIPATION_HISTORY.upsert_sql();
        assert!(sql.contains("ON CONFLICT (volunteer_email, semester_year, semester_number)"));
        assert!(sql.contains("$18"));
        assert!(!sql.contains("$19"));
    }

    #[test]
    fn insert_ignores_existing_rows() {
        assert_eq!(
            VOLUNTEERS.insert_sql(),
            "INSERT INTO volunteer_analytics.volunteers (email, full_name, membership_id) \
             VALUES ($1, $2, $3) ON CONFLICT (email) DO NOTHING"
        );
    }

    #[test]
    fn select_with_alias_prefixes_columns() {
        assert_eq!(
            REQUIREMENTS.select_sql(Some("r")),
            "SELECT r.id, r.event_id, r.volunteer_email, r.accepted \
             FROM volunteer_analytics.requirements r"
        );
    }

    #[test]
    fn create_table_marks_nullability_and_key() {
        let ddl = EVALUATIONS.create_table_sql();
        assert!(ddl.contains("    criteria JSONB,\n"));
        assert!(ddl.contains("    finalized BOOLEAN NOT NULL,\n"));
        assert!(ddl.ends_with("    PRIMARY KEY (id)\n)"));
    }

    #[test]
    fn every_key_column_is_declared() {
        for table in ALL_TABLES {
            for key in table.key {
                assert!(
                    table.columns.iter().any(|c| c.name == *key),
                    "{} key {key} missing",
                    table.name
                );
            }
        }
    }
}
