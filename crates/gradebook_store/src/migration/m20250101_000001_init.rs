use sea_orm_migration::prelude::*;

use crate::db::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Students::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Students::StudentId)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Students::Name).string_len(100).not_null())
                    .col(ColumnDef::new(Students::Email).string_len(100).not_null())
                    .col(
                        ColumnDef::new(Students::AverageGrade)
                            .double()
                            .not_null()
                            .default(0.0),
                    )
                    .col(
                        ColumnDef::new(Students::CourseCount)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Courses::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Courses::CourseId)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(Courses::CourseName)
                            .string_len(100)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Courses::EnrolledCount)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Grades::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Grades::StudentId).big_integer().not_null())
                    .col(ColumnDef::new(Grades::CourseId).big_integer().not_null())
                    .col(ColumnDef::new(Grades::Grade).double().not_null())
                    .primary_key(
                        Index::create()
                            .name("pk_grades")
                            .col(Grades::StudentId)
                            .col(Grades::CourseId),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_grades_student")
                            .from(Grades::Table, Grades::StudentId)
                            .to(Students::Table, Students::StudentId),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_grades_course")
                            .from(Grades::Table, Grades::CourseId)
                            .to(Courses::Table, Courses::CourseId),
                    )
                    .to_owned(),
            )
            .await?;

        // Per-course recompute scans by course_id; the primary key covers student_id.
        manager
            .create_index(
                Index::create()
                    .name("idx_grades_course")
                    .table(Grades::Table)
                    .col(Grades::CourseId)
                    .col(Grades::StudentId)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Grades::Table).if_exists().to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Courses::Table).if_exists().to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Students::Table).if_exists().to_owned())
            .await?;
        Ok(())
    }
}
