mod common;

use common::{
    assert_close, final_mark, insert_assessment, insert_class, insert_mark_set, insert_score,
    insert_student, open_workspace_db, student_row, temp_dir, Sidecar,
};
use serde_json::json;

#[test]
fn membership_mask_affects_assessment_averages_and_final_marks() {
    let workspace = temp_dir("markbook-calc-valid-kid");
    let mut sc = Sidecar::with_workspace(&workspace);
    let conn = open_workspace_db(&workspace);

    let class_id = insert_class(&conn, "8D");
    let ann = insert_student(&conn, &class_id, "Adams", "Ann", 0, true, "11");
    let bob = insert_student(&conn, &class_id, "Brown", "Bob", 1, true, "TBA");
    let cam = insert_student(&conn, &class_id, "Chen", "Cam", 2, false, "11");
    // Second mark set in sort order, so bit 1 of each mask applies.
    let _first = insert_mark_set(&conn, &class_id, "ENG", 0, 1.0, 0, 0);
    let ms = insert_mark_set(&conn, &class_id, "MAT", 1, 1.0, 0, 0);
    let a = insert_assessment(&conn, &ms, 0, None, 1.0, 10.0);
    insert_score(&conn, &a, &ann, 9.0);
    insert_score(&conn, &a, &bob, 5.0);
    insert_score(&conn, &a, &cam, 1.0);

    let params = json!({ "classId": class_id, "markSetId": ms });
    let before = sc.ok("calc.markSetSummary", params.clone());
    // Inactive students never count.
    assert_eq!(before["perAssessment"][0]["avgPercent"], json!(70.0));
    assert_close(final_mark(&before, "Adams, Ann"), 90.0, "Ann valid");
    assert_eq!(final_mark(&before, "Chen, Cam"), None);
    assert_eq!(student_row(&before, "Chen, Cam")["valid"], json!(false));

    conn.execute(
        "UPDATE students SET mark_set_mask = '10' WHERE id = ?",
        [&ann],
    )
    .expect("flip membership");

    let after = sc.ok("calc.markSetSummary", params.clone());
    assert_eq!(after["perAssessment"][0]["avgPercent"], json!(50.0));
    assert_eq!(after["perAssessment"][0]["scoredCount"], json!(1));
    assert_eq!(final_mark(&after, "Adams, Ann"), None);
    assert_eq!(student_row(&after, "Adams, Ann")["valid"], json!(false));

    // Scope narrows rows only.
    let mut scoped = params.clone();
    scoped["studentScope"] = json!("valid");
    let valid_only = sc.ok("calc.markSetSummary", scoped);
    let rows = valid_only["perStudent"].as_array().expect("perStudent");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["displayName"], json!("Brown, Bob"));
    assert_eq!(valid_only["perAssessment"], after["perAssessment"]);

    let mut active = params;
    active["studentScope"] = json!("active");
    let active_only = sc.ok("calc.markSetSummary", active);
    assert_eq!(active_only["perStudent"].as_array().map(|a| a.len()), Some(2));
}
