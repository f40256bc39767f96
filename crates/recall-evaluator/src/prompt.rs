use crate::EvaluateInput;

pub fn build_evaluation_prompt(input: &EvaluateInput) -> String {
    let mut checklist = String::new();
    for point in &input.unchecked_points {
        checklist.push_str(&format!(
            "- id={} content=\"{}\" context=\"{}\"\n",
            point.id, point.content, point.context
        ));
    }

    let mut exchange = String::new();
    for message in &input.recent_messages {
        exchange.push_str(&format!("{:?}: {}\n", message.role, message.content));
    }

    format!(
        "You are grading whether a student's recent messages demonstrate recall of specific facts.\n\n\
        Recall set context: {}\n\n\
        Checklist (unchecked points only):\n{}\n\
        Recent exchange:\n{}\n\
        Return a strict JSON object of the shape:\n\
        {{\"demonstrated\": [{{\"point_id\": string, \"confidence\": number 0..1, \"reasoning\": string, \
        \"message_index_start\": number, \"message_index_end\": number}}], \"overall_feedback\": string}}\n\
        Only include a point if the student's own words show real recall, not just a restated question. \
        If nothing was demonstrated, return an empty \"demonstrated\" array. Do not wrap the JSON in prose or markdown.",
        input.recall_set_context, checklist, exchange
    )
}
