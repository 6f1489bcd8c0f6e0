use sea_orm::sea_query;
use sea_orm_migration::prelude::Iden;

#[derive(Iden, Clone, Copy)]
pub enum Students {
    Table,
    StudentId,
    Name,
    Email,
    AverageGrade,
    CourseCount,
}

#[derive(Iden, Clone, Copy)]
pub enum Courses {
    Table,
    CourseId,
    CourseName,
    EnrolledCount,
}

#[derive(Iden, Clone, Copy)]
pub enum Grades {
    Table,
    StudentId,
    CourseId,
    Grade,
}
